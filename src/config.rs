use dotenv::dotenv;
use std::env;
use std::time::Duration;

const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/";

/// Runtime configuration for the pipeline: collaborator tool names, the
/// per-invocation timeout, the retrieval retry budget, and EUtils settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Alignment tool executable.
    pub clustalo: String,
    /// Motif scan tool executable.
    pub patmatmotifs: String,
    /// Subset database builder executable.
    pub makeblastdb: String,
    /// Pairwise comparison search executable.
    pub blastp: String,
    /// Upper bound on any single collaborator invocation.
    pub tool_timeout: Duration,
    /// Attempts per retrieval HTTP request; transient failures only.
    pub retrieval_attempts: u32,
    /// Maximum sequences fetched for the main query.
    pub retrieval_limit: usize,
    /// Maximum candidate accessions listed for the cross-taxon query.
    pub candidate_limit: usize,
    /// EUtils endpoint base URL.
    pub eutils_base_url: String,
    /// Contact email passed to EUtils, from `NCBI_EMAIL`.
    pub email: Option<String>,
    /// API key passed to EUtils, from `NCBI_API_KEY`.
    pub api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            clustalo: "clustalo".to_string(),
            patmatmotifs: "patmatmotifs".to_string(),
            makeblastdb: "makeblastdb".to_string(),
            blastp: "blastp".to_string(),
            tool_timeout: Duration::from_secs(600),
            retrieval_attempts: 3,
            retrieval_limit: 1000,
            candidate_limit: 10,
            eutils_base_url: EUTILS_BASE_URL.to_string(),
            email: None,
            api_key: None,
        }
    }
}

impl Config {
    /// Builds a configuration with EUtils credentials loaded from the
    /// environment (and a `.env` file if present).
    pub fn from_env() -> Self {
        dotenv().ok();
        Config {
            email: env::var("NCBI_EMAIL").ok(),
            api_key: env::var("NCBI_API_KEY").ok(),
            ..Config::default()
        }
    }
}
