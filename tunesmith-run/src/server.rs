//! Match server lifecycle
//!
//! The arbiter that referees games between workers. The tuner treats
//! it as a singleton external resource: brought up once per run,
//! killed on shutdown. Without it no run is possible, so setup errors
//! are fatal to the caller.

use std::path::PathBuf;

use tokio::process::{Child, Command};

use tunesmith_core::RunConfig;

use crate::exec::fetch_source;

/// Errors bringing the match server up. All are fatal to a run.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to fetch match server source")]
    Fetch(#[source] std::io::Error),
    #[error("failed to launch match server")]
    Launch(#[source] std::io::Error),
}

/// One listening match arbiter process.
pub struct MatchServer {
    config: tunesmith_core::ServerConfig,
    dir: PathBuf,
    child: Option<Child>,
}

impl MatchServer {
    pub fn new(config: &RunConfig) -> Self {
        MatchServer {
            config: config.server.clone(),
            dir: config.work_dir.join("match-server"),
            child: None,
        }
    }

    /// Prepare a working copy and launch the listening arbiter.
    pub async fn setup(&mut self) -> Result<(), ServerError> {
        if self.child.is_some() {
            return Ok(());
        }

        fetch_source(&self.config.repository, &self.config.branch, &self.dir)
            .await
            .map_err(ServerError::Fetch)?;

        let Some((program, args)) = self.config.command.split_first() else {
            return Err(ServerError::Launch(std::io::Error::other(
                "empty server command",
            )));
        };
        let child = Command::new(program)
            .args(args)
            .current_dir(&self.dir)
            .kill_on_drop(true)
            .spawn()
            .map_err(ServerError::Launch)?;
        self.child = Some(child);

        tracing::info!(port = self.config.port, "match server up");
        Ok(())
    }

    /// Kill and reap the arbiter. Idempotent; failures are logged only.
    pub async fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.kill().await {
                tracing::warn!(error = %err, "failed to stop match server");
            } else {
                tracing::info!("match server stopped");
            }
        }
    }
}
