//! Interface de linha de comando baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (serve, ask, result,
//! status, agents) e flags globais (--config, --verbose).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Copiloto de análise de causa raiz para chão de fábrica.
#[derive(Debug, Parser)]
#[command(name = "rca-copilot", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./rca.toml).
    #[arg(long, global = true, env = "RCA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sobe o gateway HTTP e os workers do orquestrador.
    Serve {
        /// Endereço de escuta; sobrescreve `bind` do arquivo.
        #[arg(long)]
        bind: Option<String>,

        /// Número de workers; sobrescreve `workers` do arquivo.
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Envia uma pergunta ao gateway.
    Ask {
        /// Pergunta em linguagem natural.
        query: String,

        /// Restringe a busca a uma máquina.
        #[arg(long)]
        machine_id: Option<String>,

        /// Restringe a busca a um tipo de sensor.
        #[arg(long)]
        sensor_type: Option<String>,

        /// Máximo de evidências por capability.
        #[arg(long)]
        top_k: Option<usize>,

        /// Aguarda o job terminar e imprime o relatório.
        #[arg(long, default_value_t = false)]
        wait: bool,
    },

    /// Mostra o registro de um job.
    Result {
        job_id: String,
    },

    /// Mostra a saúde do gateway (fila, store, pendências).
    Status,

    /// Lista as capabilities de recuperação e seus domínios.
    Agents,
}
