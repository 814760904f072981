//! Configuração do motor de transmutações carregada a partir de `transmute.toml`.
//!
//! A struct [`TransmuteConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `TRANSMUTE_DAILY_CHECK_HOUR` tem precedência sobre o arquivo.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::simulation::DurationBounds;

pub const DEFAULT_DAILY_CHECK_HOUR: &str = "02:00";
pub const DEFAULT_LOW_STOCK_THRESHOLD: f64 = 10.0;
pub const DEFAULT_MISSION_STALE_DAYS: i64 = 7;

const CONFIG_FILE: &str = "transmute.toml";
const CHECK_HOUR_ENV: &str = "TRANSMUTE_DAILY_CHECK_HOUR";

/// Configuração de nível superior carregada de `transmute.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct TransmuteConfig {
    /// Duração mínima de uma transmutação, em segundos.
    #[serde(default = "default_duration")]
    pub transmutation_duration: u64,

    /// Duração máxima (complexidade MASTER), em segundos.
    #[serde(default = "default_duration_high")]
    pub transmutation_duration_high: u64,

    /// Horário local (HH:MM) da verificação diária.
    #[serde(default = "default_daily_check_hour")]
    pub daily_check_hour: String,

    /// Estoque igual ou abaixo deste valor gera alerta.
    #[serde(default = "default_low_stock_threshold")]
    pub material_low_stock_threshold: f64,

    /// Missões abertas sem atualização há mais dias que isto geram alerta.
    #[serde(default = "default_mission_stale_days")]
    pub mission_stale_days: i64,

    /// Capacidade do canal de notificações.
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

// Valor padrão para a duração base: 30s.
fn default_duration() -> u64 {
    30
}

// Valor padrão para a duração máxima: 120s.
fn default_duration_high() -> u64 {
    120
}

fn default_daily_check_hour() -> String {
    DEFAULT_DAILY_CHECK_HOUR.to_string()
}

fn default_low_stock_threshold() -> f64 {
    DEFAULT_LOW_STOCK_THRESHOLD
}

fn default_mission_stale_days() -> i64 {
    DEFAULT_MISSION_STALE_DAYS
}

fn default_notification_capacity() -> usize {
    64
}

impl Default for TransmuteConfig {
    fn default() -> Self {
        Self {
            transmutation_duration: default_duration(),
            transmutation_duration_high: default_duration_high(),
            daily_check_hour: default_daily_check_hour(),
            material_low_stock_threshold: default_low_stock_threshold(),
            mission_stale_days: default_mission_stale_days(),
            notification_capacity: default_notification_capacity(),
        }
    }
}

impl TransmuteConfig {
    /// Carrega a configuração de `transmute.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Carrega a configuração de um caminho explícito.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str::<TransmuteConfig>(&contents)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração.
        if let Ok(hour) = std::env::var(CHECK_HOUR_ENV) {
            if !hour.trim().is_empty() {
                config.daily_check_hour = hour;
            }
        }

        Ok(config)
    }

    /// Limites de duração usados pela simulação.
    pub fn duration_bounds(&self) -> DurationBounds {
        DurationBounds::new(self.transmutation_duration, self.transmutation_duration_high)
    }

    /// Limiar de estoque baixo; valores não positivos voltam ao padrão.
    pub fn low_stock_threshold(&self) -> f64 {
        if self.material_low_stock_threshold > 0.0 {
            self.material_low_stock_threshold
        } else {
            DEFAULT_LOW_STOCK_THRESHOLD
        }
    }

    /// Dias até uma missão ser considerada atrasada; valores não positivos voltam ao padrão.
    pub fn stale_days(&self) -> i64 {
        if self.mission_stale_days > 0 {
            self.mission_stale_days
        } else {
            DEFAULT_MISSION_STALE_DAYS
        }
    }
}
