//! Interface de terminal do motor de transmutações: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`LifecycleProgress`] acompanha visualmente
//! uma transmutação no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use transmute::simulation::Breakdown;
use transmute::sweep::{SweepError, SweepReport};
use transmute::{AuditRecord, Transmutation, TransmutationStatus};

/// Indicador visual do ciclo de vida de uma transmutação.
///
/// Exibe um spinner enquanto a transmutação está ativa e uma mensagem
/// colorida com o status final.
pub struct LifecycleProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl LifecycleProgress {
    /// Inicia o spinner com a descrição da transmutação.
    pub fn start(description: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        // O template é constante; se falhar, mantém o estilo padrão.
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("SUBMITTED: {description}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a mensagem do spinner para refletir o status atual.
    pub fn update(&self, transmutation: &Transmutation) {
        self.pb.set_message(format!(
            "{} #{} ({}s estimated)",
            transmutation.status, transmutation.id, transmutation.estimated_duration_secs
        ));
    }

    /// Imprime uma linha acima do spinner.
    pub fn note(&self, message: &str) {
        self.pb
            .println(format!("  {} {message}", self.yellow.apply_to("•")));
    }

    /// Finaliza o spinner e exibe o status final.
    pub fn finish(&self, transmutation: &Transmutation) {
        self.pb.finish_and_clear();
        let (mark, style) = match transmutation.status {
            TransmutationStatus::Completed => ("✓", &self.green),
            TransmutationStatus::Cancelled | TransmutationStatus::Failed => ("✗", &self.red),
            _ => ("…", &self.yellow),
        };
        println!(
            "  {} Transmutation #{} for {} ended {}",
            style.apply_to(mark),
            transmutation.id,
            transmutation.requester_name(),
            transmutation.status
        );
    }
}

/// Imprime o detalhamento de uma simulação.
pub fn print_breakdown(breakdown: &Breakdown) {
    let bold = Style::new().bold();
    let dim = Style::new().dim();
    println!("{}", bold.apply_to("─── Simulation ───"));
    println!(
        "  complexity {} (x{:.2})  risk {} (x{:.2})  catalyst {} (x{:.2})",
        breakdown.complexity,
        breakdown.complexity_weight,
        breakdown.risk_level,
        breakdown.risk_multiplier,
        breakdown.catalyst_quality,
        breakdown.catalyst_modifier
    );
    for line in &breakdown.materials_breakdown {
        println!(
            "  {} {} x{} @ {:.2} = {:.2}",
            dim.apply_to(format!("#{}", line.material_id)),
            line.name,
            line.quantity,
            line.unit_cost,
            line.subtotal
        );
    }
    println!(
        "  materials {:.2} + arcane energy {:.2}",
        breakdown.base_material_cost, breakdown.arcane_energy_cost
    );
    println!(
        "  {} {:.2} in {}s",
        Style::new().green().bold().apply_to("estimated"),
        breakdown.estimated_cost,
        breakdown.duration_seconds
    );
}

/// Imprime a trilha de auditoria, uma linha por registro.
pub fn print_audit_trail(records: &[AuditRecord]) {
    println!();
    println!("{}", Style::new().bold().apply_to("─── Audit Trail ───"));
    let cyan = Style::new().cyan();
    for record in records {
        println!(
            "  {} {} {}",
            record.created_at.format("%H:%M:%S"),
            cyan.apply_to(record.action),
            record.description
        );
    }
}

/// Imprime o resultado de uma verificação diária.
pub fn print_sweep(result: &Result<SweepReport, SweepError>) {
    match result {
        Ok(report) => println!(
            "  {} {} material alert(s), {} mission alert(s)",
            Style::new().green().bold().apply_to("✓"),
            report.material_alerts,
            report.mission_alerts
        ),
        Err(err) => {
            let red = Style::new().red().bold();
            for failure in &err.failures {
                for cause in &failure.errors {
                    println!("  {} {} check: {cause}", red.apply_to("✗"), failure.check);
                }
            }
        }
    }
}
