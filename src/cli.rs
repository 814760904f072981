//! Interface de linha de comando do motor de transmutações baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (simulate, demo, sweep, serve)
//! e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use transmute::simulation::MaterialLine;

/// Motor de ciclo de vida de transmutações: simulação, aprovação e verificações diárias.
#[derive(Debug, Parser)]
#[command(name = "transmute", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho para o arquivo de configuração (padrão: ./transmute.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Calcula custo e duração de uma transmutação sem criá-la.
    Simulate {
        /// Descrição da transmutação.
        #[arg(default_value = "")]
        description: String,

        /// Complexidade explícita (TRIVIAL, LOW, MEDIUM, HIGH, MASTER).
        #[arg(long)]
        complexity: Option<String>,

        /// Nível de risco explícito (LOW, GUARDED, HIGH, CRITICAL).
        #[arg(long)]
        risk: Option<String>,

        /// Qualidade do catalisador (1 a 5).
        #[arg(long)]
        catalyst: Option<i64>,

        /// Material no formato ID:QUANTIDADE (pode repetir).
        #[arg(long = "material", value_parser = parse_material_line)]
        materials: Vec<MaterialLine>,
    },

    /// Executa o ciclo completo em um armazenamento em memória de demonstração.
    Demo {
        /// Descrição da transmutação.
        #[arg(default_value = "Transmute lead into gold")]
        description: String,

        /// Cancela a transmutação no meio da execução.
        #[arg(long, default_value_t = false)]
        cancel: bool,
    },

    /// Executa uma verificação diária imediatamente.
    Sweep,

    /// Mantém as verificações diárias rodando até Ctrl-C.
    Serve,
}

/// Converte `ID:QUANTIDADE` em uma linha de material.
fn parse_material_line(raw: &str) -> Result<MaterialLine, String> {
    let (id, quantity) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected ID:QTY, got '{raw}'"))?;
    let material_id = id
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("invalid material id '{id}': {e}"))?;
    let quantity = quantity
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid quantity '{quantity}': {e}"))?;
    Ok(MaterialLine {
        material_id,
        quantity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_simulate_subcommand() {
        let cli = Cli::parse_from([
            "transmute",
            "simulate",
            "Forge a blade",
            "--risk",
            "high",
            "--material",
            "1:2.5",
            "--material",
            "3:1",
        ]);
        match cli.command {
            Command::Simulate {
                description,
                complexity,
                risk,
                materials,
                ..
            } => {
                assert_eq!(description, "Forge a blade");
                assert!(complexity.is_none());
                assert_eq!(risk.as_deref(), Some("high"));
                assert_eq!(materials.len(), 2);
                assert_eq!(materials[0].material_id, 1);
                assert_eq!(materials[0].quantity, 2.5);
            }
            _ => panic!("expected Simulate command"),
        }
    }

    #[test]
    fn cli_rejects_malformed_material() {
        assert!(Cli::try_parse_from(["transmute", "simulate", "x", "--material", "7"]).is_err());
        assert!(Cli::try_parse_from(["transmute", "simulate", "x", "--material", "a:1"]).is_err());
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "transmute",
            "--config",
            "alt.toml",
            "--verbose",
            "demo",
            "--cancel",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("alt.toml")));
        assert!(matches!(cli.command, Command::Demo { cancel: true, .. }));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
