//! Interface de terminal: spinners e saída colorida.
//!
//! Usa `indicatif` para o spinner de acompanhamento e `console` para cores.
//! O [`JobProgress`] acompanha um job enquanto o cliente faz polling.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::agents::Capability;
use crate::gateway::Health;
use crate::state_machine::{Job, JobStatus};

/// Indicador visual de um job em andamento.
///
/// Exibe um spinner enquanto o job não termina e uma linha colorida no fim:
/// verde para sucesso, vermelho para falha.
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
}

impl JobProgress {
    /// Inicia o spinner para o job recém-submetido.
    pub fn start(job_id: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!("{job_id}: queued"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    /// Atualiza a mensagem com o status mais recente.
    pub fn update(&self, job: &Job) {
        self.pb.set_message(format!("{}: {}", job.id, job.status));
    }

    /// Finaliza o spinner e imprime o resultado do job.
    pub fn finish(&self, job: &Job) {
        self.pb.finish_and_clear();
        match job.status {
            JobStatus::Completed => {
                println!("  {} Analysis completed", self.green.apply_to("✓"));
                println!();
                println!("{}", job.result.as_deref().unwrap_or_default());
            }
            _ => {
                println!(
                    "  {} Analysis failed: {}",
                    self.red.apply_to("✗"),
                    job.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
}

fn status_style(status: JobStatus) -> Style {
    match status {
        JobStatus::Completed => Style::new().green().bold(),
        JobStatus::Failed => Style::new().red().bold(),
        JobStatus::Processing => Style::new().cyan(),
        JobStatus::Queued => Style::new().yellow(),
    }
}

/// Linha de resumo `id  status  routing`.
pub fn summary_line(job: &Job) -> String {
    let routing = job
        .routing
        .map(|r| r.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!("{}  {:<10}  {routing}", job.id, job.status.as_str())
}

/// Imprime o registro completo de um job.
pub fn print_job(job: &Job) {
    println!(
        "{}",
        status_style(job.status).apply_to(format!("─── {} ───", job.status))
    );
    println!("{}", summary_line(job));
    println!("query: {}", job.query);
    for response in &job.agent_responses {
        let mark = if response.success { "✓" } else { "✗" };
        match &response.error {
            Some(error) => println!("  {mark} {} ({error})", response.capability.label()),
            None => println!(
                "  {mark} {} ({} item(s), {}ms)",
                response.capability.label(),
                response.evidence.len(),
                response.elapsed_ms
            ),
        }
    }
    if let Some(result) = &job.result {
        println!();
        println!("{result}");
    }
    if let Some(error) = &job.error {
        println!("error: {error}");
    }
}

pub fn print_health(health: &Health) {
    let style = if health.status == "healthy" {
        Style::new().green().bold()
    } else {
        Style::new().red().bold()
    };
    println!("status:  {}", style.apply_to(&health.status));
    println!("queue:   {}", connected(health.queue_connected));
    println!("store:   {}", connected(health.store_connected));
    println!("pending: {}", health.pending_count);
}

fn connected(ok: bool) -> &'static str {
    if ok { "connected" } else { "unreachable" }
}

pub fn print_agents() {
    let bold = Style::new().bold();
    for capability in Capability::ALL {
        println!("{}", bold.apply_to(capability.label()));
        println!("  {}", capability.description());
    }
}
