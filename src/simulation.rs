//! Deterministic cost and duration simulation for a transmutation request.
//!
//! Tiers are resolved from explicit overrides or inferred from keywords in
//! the description, the same way for every caller. The only I/O is the batch
//! lookup of material unit costs.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::TransmuteError;
use crate::repository::MaterialRepository;

/// Description stored when the caller leaves it blank.
pub const PLACEHOLDER_DESCRIPTION: &str = "Generic transmutation";

pub const DEFAULT_COMPLEXITY: &str = "LOW";
pub const DEFAULT_RISK: &str = "GUARDED";
pub const DEFAULT_CATALYST_QUALITY: u8 = 3;
pub const MIN_CATALYST_QUALITY: u8 = 1;
pub const MAX_CATALYST_QUALITY: u8 = 5;

const COMPLEXITY_TIERS: &[(&str, f64)] = &[
    ("TRIVIAL", 0.8),
    ("LOW", 1.0),
    ("MEDIUM", 1.35),
    ("HIGH", 1.75),
    ("MASTER", 2.15),
];

const RISK_TIERS: &[(&str, f64)] = &[
    ("LOW", 1.0),
    ("GUARDED", 1.12),
    ("MEDIUM", 1.25),
    ("HIGH", 1.55),
    ("CRITICAL", 1.9),
];

const MASTER_KEYWORDS: &[&str] = &["philosopher", "forbidden", "piedra filosof"];
const PHILOSOPHER_KEYWORDS: &[&str] = &["philosopher", "piedra filosof"];
const HUMAN_KEYWORDS: &[&str] = &["human", "humana"];
const CRITICAL_RISK_KEYWORDS: &[&str] = &["forbidden", "human", "humana"];
const HIGH_RISK_KEYWORDS: &[&str] = &["unstable", "volatile", "experimental"];
const MEDIUM_RISK_KEYWORDS: &[&str] = &["prototype", "trial", "ensayo"];
const PRISTINE_CATALYST_KEYWORDS: &[&str] = &["ancient", "ancestral", "pure", "pura"];
const REFINED_CATALYST_KEYWORDS: &[&str] = &["refined", "stabilized", "standard", "estandar"];
const CRUDE_CATALYST_KEYWORDS: &[&str] = &["improvised", "unstable", "mercurial", "impure"];

/// A resolved tier: its canonical key and numeric weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tier {
    pub key: &'static str,
    pub weight: f64,
}

fn tier(table: &[(&'static str, f64)], key: &str) -> Option<Tier> {
    table
        .iter()
        .find(|(k, _)| *k == key)
        .map(|&(key, weight)| Tier { key, weight })
}

fn complexity_tier(key: &str) -> Tier {
    tier(COMPLEXITY_TIERS, key).unwrap_or(Tier {
        key: DEFAULT_COMPLEXITY,
        weight: 1.0,
    })
}

fn risk_tier(key: &str) -> Tier {
    tier(RISK_TIERS, key).unwrap_or(Tier {
        key: DEFAULT_RISK,
        weight: 1.12,
    })
}

fn mentions(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

/// Blank or literally the placeholder, compared case-insensitively.
fn is_placeholder(lower: &str) -> bool {
    let trimmed = lower.trim();
    trimmed.is_empty() || trimmed == PLACEHOLDER_DESCRIPTION.to_lowercase()
}

fn explicit_key(provided: Option<&str>) -> Option<String> {
    provided
        .map(|p| p.trim().to_uppercase())
        .filter(|p| !p.is_empty())
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One requested material and its quantity, as received at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaterialLine {
    pub material_id: i64,
    pub quantity: f64,
}

/// Input to [`Simulator::simulate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationRequest {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub complexity: Option<String>,
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub catalyst_quality: Option<i64>,
    #[serde(default)]
    pub materials: Vec<MaterialLine>,
}

impl SimulationRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }
}

/// Priced line for one distinct material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialCost {
    pub material_id: u64,
    pub name: String,
    pub quantity: f64,
    pub unit_cost: f64,
    pub subtotal: f64,
}

/// Result of a simulation. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub complexity: String,
    pub risk_level: String,
    pub catalyst_quality: u8,
    pub base_material_cost: f64,
    pub arcane_energy_cost: f64,
    pub complexity_weight: f64,
    pub risk_multiplier: f64,
    pub catalyst_modifier: f64,
    pub estimated_cost: f64,
    pub duration_seconds: u64,
    pub materials_breakdown: Vec<MaterialCost>,
}

/// Floor and ceiling durations, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationBounds {
    pub base_secs: u64,
    pub high_secs: u64,
}

impl DurationBounds {
    /// `high` is raised to at least `base`.
    pub fn new(base_secs: u64, high_secs: u64) -> Self {
        Self {
            base_secs,
            high_secs: high_secs.max(base_secs),
        }
    }
}

/// Resolve the complexity tier from an override or the description.
pub fn resolve_complexity(description: &str, provided: Option<&str>) -> Result<Tier, TransmuteError> {
    if let Some(key) = explicit_key(provided) {
        return tier(COMPLEXITY_TIERS, &key)
            .ok_or_else(|| TransmuteError::InvalidComplexity(provided.unwrap_or_default().to_string()));
    }

    let lower = description.to_lowercase();
    let words = lower.split_whitespace().count();
    let key = if mentions(&lower, MASTER_KEYWORDS) {
        "MASTER"
    } else if words > 18 {
        "HIGH"
    } else if words > 10 {
        "MEDIUM"
    } else if is_placeholder(&lower) {
        DEFAULT_COMPLEXITY
    } else if words <= 3 {
        "TRIVIAL"
    } else {
        DEFAULT_COMPLEXITY
    };
    Ok(complexity_tier(key))
}

/// Resolve the risk tier from an override or the description.
pub fn resolve_risk(description: &str, provided: Option<&str>) -> Result<Tier, TransmuteError> {
    if let Some(key) = explicit_key(provided) {
        return tier(RISK_TIERS, &key)
            .ok_or_else(|| TransmuteError::InvalidRisk(provided.unwrap_or_default().to_string()));
    }

    let lower = description.to_lowercase();
    let key = if mentions(&lower, CRITICAL_RISK_KEYWORDS) {
        "CRITICAL"
    } else if mentions(&lower, HIGH_RISK_KEYWORDS) {
        "HIGH"
    } else if mentions(&lower, MEDIUM_RISK_KEYWORDS) {
        "MEDIUM"
    } else if is_placeholder(&lower) {
        DEFAULT_RISK
    } else {
        "LOW"
    };
    Ok(risk_tier(key))
}

/// Catalyst quality in `1..=5`; overrides are clamped.
pub fn resolve_catalyst_quality(provided: Option<i64>, description: &str) -> u8 {
    if let Some(q) = provided {
        return q.clamp(MIN_CATALYST_QUALITY as i64, MAX_CATALYST_QUALITY as i64) as u8;
    }
    let lower = description.to_lowercase();
    // "impure" contains "pure".
    if mentions(&lower, PRISTINE_CATALYST_KEYWORDS) && !lower.contains("impure") {
        MAX_CATALYST_QUALITY
    } else if mentions(&lower, REFINED_CATALYST_KEYWORDS) {
        4
    } else if mentions(&lower, CRUDE_CATALYST_KEYWORDS) {
        2
    } else {
        DEFAULT_CATALYST_QUALITY
    }
}

/// Energy cost of the transmutation circle itself, before risk and catalyst.
pub fn arcane_energy_cost(description: &str, complexity_weight: f64) -> f64 {
    let desc = description.trim();
    let lower = desc.to_lowercase();
    if is_placeholder(&lower) {
        return 30.0 * complexity_weight;
    }

    let words = desc.split_whitespace().count();
    let mut base = 45.0 + words as f64 * 3.2;
    if desc.chars().count() > 120 {
        base += 18.0;
    }
    if mentions(&lower, HUMAN_KEYWORDS) {
        base += 40.0;
    } else if lower.contains("metal") {
        base += 12.0;
    }
    if mentions(&lower, PHILOSOPHER_KEYWORDS) {
        base += 55.0;
    }
    base * complexity_weight
}

/// Quality 3 is neutral; every point above lowers cost by 7%.
pub fn catalyst_modifier(quality: u8) -> f64 {
    let diff = DEFAULT_CATALYST_QUALITY as f64 - quality as f64;
    (1.0 + diff * 0.07).clamp(0.6, 1.4)
}

/// Duration in whole seconds, never below `bounds.base_secs`.
pub fn estimate_duration_secs(
    bounds: DurationBounds,
    description: &str,
    complexity_weight: f64,
    risk_multiplier: f64,
    catalyst_quality: u8,
    material_count: usize,
) -> u64 {
    let base = bounds.base_secs as f64;
    let high = bounds.high_secs.max(bounds.base_secs) as f64;

    let min_weight = complexity_tier("TRIVIAL").weight;
    let max_weight = complexity_tier("MASTER").weight;
    let normalized = ((complexity_weight - min_weight) / (max_weight - min_weight)).clamp(0.0, 1.0);

    let mut duration = base + (high - base) * normalized;
    let words = description.split_whitespace().count();
    if words > 22 {
        duration += (words - 22) as f64 * 0.8;
    }
    duration *= risk_multiplier;
    duration *= 1.0 + material_count as f64 * 0.04;
    duration *= 1.0 - (catalyst_quality as f64 - DEFAULT_CATALYST_QUALITY as f64) * 0.03;
    duration.max(base).round() as u64
}

/// Prices requests against a material catalogue.
#[derive(Clone)]
pub struct Simulator {
    materials: Arc<dyn MaterialRepository>,
    bounds: DurationBounds,
}

impl Simulator {
    pub fn new(materials: Arc<dyn MaterialRepository>, bounds: DurationBounds) -> Self {
        Self { materials, bounds }
    }

    pub fn bounds(&self) -> DurationBounds {
        self.bounds
    }

    pub fn simulate(&self, req: &SimulationRequest) -> Result<Breakdown, TransmuteError> {
        let desc = req.description.trim();

        let complexity = resolve_complexity(desc, req.complexity.as_deref())?;
        let risk = resolve_risk(desc, req.risk_level.as_deref())?;
        let quality = resolve_catalyst_quality(req.catalyst_quality, desc);

        let (base_material_cost, lines) = self.material_cost(&req.materials)?;

        let arcane = arcane_energy_cost(desc, complexity.weight);
        let modifier = catalyst_modifier(quality);
        let estimated_cost = round2((base_material_cost + arcane) * risk.weight * modifier);
        let duration_seconds = estimate_duration_secs(
            self.bounds,
            desc,
            complexity.weight,
            risk.weight,
            quality,
            lines.len(),
        );

        Ok(Breakdown {
            complexity: complexity.key.to_string(),
            risk_level: risk.key.to_string(),
            catalyst_quality: quality,
            base_material_cost: round2(base_material_cost),
            arcane_energy_cost: round2(arcane),
            complexity_weight: complexity.weight,
            risk_multiplier: risk.weight,
            catalyst_modifier: round2(modifier),
            estimated_cost,
            duration_seconds,
            materials_breakdown: lines,
        })
    }

    /// Sum quantities per material id in first-seen order, then price them
    /// in one batch lookup.
    fn material_cost(&self, requested: &[MaterialLine]) -> Result<(f64, Vec<MaterialCost>), TransmuteError> {
        if requested.is_empty() {
            return Ok((0.0, Vec::new()));
        }

        let mut order: Vec<u64> = Vec::with_capacity(requested.len());
        let mut quantities: HashMap<u64, f64> = HashMap::new();
        for line in requested {
            if line.material_id <= 0 {
                return Err(TransmuteError::InvalidQuantity(format!(
                    "invalid material id {}",
                    line.material_id
                )));
            }
            if !(line.quantity > 0.0 && line.quantity.is_finite()) {
                return Err(TransmuteError::InvalidQuantity(format!(
                    "material {}",
                    line.material_id
                )));
            }
            let id = line.material_id as u64;
            if !quantities.contains_key(&id) {
                order.push(id);
            }
            *quantities.entry(id).or_insert(0.0) += line.quantity;
        }

        let found: HashMap<u64, _> = self
            .materials
            .find_by_ids(&order)?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        let missing: Vec<u64> = order.iter().copied().filter(|id| !found.contains_key(id)).collect();
        if !missing.is_empty() {
            return Err(TransmuteError::MaterialNotFound { ids: missing });
        }

        let mut total = 0.0;
        let mut lines = Vec::with_capacity(order.len());
        for id in order {
            let material = &found[&id];
            let quantity = quantities[&id];
            let subtotal = material.unit_cost * quantity;
            total += subtotal;
            lines.push(MaterialCost {
                material_id: id,
                name: material.name.clone(),
                quantity: round2(quantity),
                unit_cost: round2(material.unit_cost),
                subtotal: round2(subtotal),
            });
        }
        Ok((total, lines))
    }
}
