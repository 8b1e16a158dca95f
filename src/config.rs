//! Configuração do serviço carregada a partir de `rca.toml`.
//!
//! A struct [`RcaConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! Variáveis de ambiente (`ANTHROPIC_API_KEY`, `RCA_BIND`, `RCA_DATABASE_PATH`)
//! têm precedência sobre o arquivo.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agents::Capability;
use crate::error::{RcaError, Result};

/// Arquivo lido quando `--config` não é informado.
pub const DEFAULT_CONFIG_FILE: &str = "rca.toml";

/// Configuração de nível superior carregada de `rca.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct RcaConfig {
    /// Endereço em que o gateway HTTP escuta.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Número de workers do orquestrador dentro do processo.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Prefixo das chaves no result store.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Tempo de vida de registros terminais, em segundos.
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,

    /// Limite por chamada de capability, em segundos.
    #[serde(default = "default_capability_timeout_secs")]
    pub capability_timeout_secs: u64,

    /// Prazo total do pipeline de um job, em segundos.
    #[serde(default = "default_job_deadline_secs")]
    pub job_deadline_secs: u64,

    /// Tempo após o qual um job em `processing` é considerado abandonado.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// Reentregas permitidas antes de marcar o job como falho.
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,

    /// Máximo de retentativas para operações de fila/store.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Atraso base em milissegundos para backoff exponencial.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Arquivo SQLite do result store. Ausente: store em memória.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Chave da API Anthropic. Vazia: roteamento por palavras-chave e relatório por template.
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_router_model")]
    pub router_model: String,

    #[serde(default = "default_report_model")]
    pub report_model: String,

    /// Limite de tokens da resposta do relatório.
    #[serde(default = "default_report_max_tokens")]
    pub report_max_tokens: u32,

    /// URL do gateway usada pelos subcomandos cliente (`ask`, `result`, `status`).
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Colaboradores de recuperação, indexados pelo nome da capability.
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,
}

/// Origem da evidência de uma capability: endpoint HTTP ou dataset JSON local.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub dataset: Option<PathBuf>,
}

/// Origem resolvida de um colaborador.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentSource {
    Endpoint(String),
    Dataset(PathBuf),
}

/// Backoff exponencial para reconexão com fila e store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

const MAX_BACKOFF_MS: u64 = 30_000;

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// delay = base_delay_ms * 2^(attempt - 1), limitado a 30s.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(MAX_BACKOFF_MS))
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_workers() -> usize {
    2
}

fn default_namespace() -> String {
    "rca_copilot".to_string()
}

fn default_result_ttl_secs() -> u64 {
    3600
}

fn default_capability_timeout_secs() -> u64 {
    30
}

fn default_job_deadline_secs() -> u64 {
    300
}

fn default_visibility_timeout_secs() -> u64 {
    600
}

fn default_max_redeliveries() -> u32 {
    2
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_router_model() -> String {
    "claude-haiku-4-5-20251001".to_string()
}

fn default_report_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_report_max_tokens() -> u32 {
    2000
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

impl Default for RcaConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            workers: default_workers(),
            namespace: default_namespace(),
            result_ttl_secs: default_result_ttl_secs(),
            capability_timeout_secs: default_capability_timeout_secs(),
            job_deadline_secs: default_job_deadline_secs(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            max_redeliveries: default_max_redeliveries(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            database_path: None,
            api_key: String::new(),
            router_model: default_router_model(),
            report_model: default_report_model(),
            report_max_tokens: default_report_max_tokens(),
            gateway_url: default_gateway_url(),
            agents: BTreeMap::new(),
        }
    }
}

impl RcaConfig {
    /// Carrega a configuração de `path`, ou de `rca.toml` no diretório atual.
    ///
    /// Um caminho explícito inexistente é erro; o arquivo padrão ausente
    /// resulta nos valores padrão.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(RcaError::Config(format!(
                        "config file {} not found",
                        path.display()
                    )));
                }
                Self::from_toml(&std::fs::read_to_string(path)?)?
            }
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_toml(&std::fs::read_to_string(path)?)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str::<RcaConfig>(contents)?)
    }

    /// Sobrescreve campos com variáveis de ambiente não vazias.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(key) = var("ANTHROPIC_API_KEY") {
            self.api_key = key;
        }
        if let Some(bind) = var("RCA_BIND") {
            self.bind = bind;
        }
        if let Some(path) = var("RCA_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(RcaError::Config("workers must be at least 1".into()));
        }
        if self.capability_timeout_secs == 0 || self.job_deadline_secs == 0 {
            return Err(RcaError::Config("timeouts must be positive".into()));
        }
        if self.report_max_tokens == 0 {
            return Err(RcaError::Config("report_max_tokens must be positive".into()));
        }
        if self.visibility_timeout_secs <= self.job_deadline_secs {
            return Err(RcaError::Config(format!(
                "visibility_timeout_secs ({}) must exceed job_deadline_secs ({})",
                self.visibility_timeout_secs, self.job_deadline_secs
            )));
        }
        self.agent_sources().map(|_| ())
    }

    /// Resolve a tabela `[agents.*]`, rejeitando capabilities desconhecidas
    /// e entradas sem exatamente uma origem.
    pub fn agent_sources(&self) -> Result<Vec<(Capability, AgentSource)>> {
        let mut sources = Vec::new();
        for (name, agent) in &self.agents {
            let capability = Capability::parse(name)
                .ok_or_else(|| RcaError::Config(format!("unknown capability `{name}`")))?;
            let source = match (&agent.endpoint, &agent.dataset) {
                (Some(url), None) => AgentSource::Endpoint(url.clone()),
                (None, Some(path)) => AgentSource::Dataset(path.clone()),
                _ => {
                    return Err(RcaError::Config(format!(
                        "agent `{name}` needs exactly one of `endpoint` or `dataset`"
                    )));
                }
            };
            sources.push((capability, source));
        }
        Ok(sources)
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_secs(self.capability_timeout_secs)
    }

    pub fn job_deadline(&self) -> Duration {
        Duration::from_secs(self.job_deadline_secs)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay_ms: self.base_delay_ms,
        }
    }
}
