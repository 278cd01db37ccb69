use anyhow::{bail, Context};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_LOG_FILTER: &str = "pathkeepers=info";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub cgpa_scale: f64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").filter(|value| !value.trim().is_empty());

        let max_connections = match lookup("PATHKEEPERS_DB_MAX_CONNECTIONS") {
            Some(raw) => {
                let parsed: u32 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid PATHKEEPERS_DB_MAX_CONNECTIONS '{raw}'"))?;
                if parsed == 0 {
                    bail!("PATHKEEPERS_DB_MAX_CONNECTIONS must be at least 1");
                }
                parsed
            }
            None => DEFAULT_MAX_CONNECTIONS,
        };

        // Only a 5-point scale is recognised; anything else keeps the 10-point default.
        let cgpa_scale = match lookup("CGPA_SCALE").as_deref().map(str::trim) {
            Some("5") => 5.0,
            _ => 10.0,
        };

        Ok(Self {
            database_url,
            max_connections,
            cgpa_scale,
        })
    }

    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a Postgres instance")
    }
}
