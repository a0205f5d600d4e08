//! Worker lifecycle
//!
//! A worker owns one engine working copy built with one candidate
//! vector. The manager only sees setup/start/score/stop/cleanup; all
//! the filesystem and process handling stays in here.

use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::{Child, Command};

use tunesmith_core::{CandidateVector, RunConfig, Score};

use crate::exec::{fetch_source, run_checked};

/// Per-worker failures. None of these affect sibling workers.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker {name}: setup failed")]
    Setup {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("worker {0}: engine already running")]
    AlreadyRunning(String),
    #[error("worker {name}: failed to launch engine")]
    Launch {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("worker {0}: no score available yet")]
    ScoreUnavailable(String),
    #[error("worker {name}: failed to read transcript log")]
    Transcript {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("worker {name}: failed to stop engine")]
    Stop {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Role of a worker within a generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerKind {
    /// Reference opponent playing the normal (or current) values
    Baseline,
    /// Vector under evaluation; its scores feed the grid
    Candidate,
}

/// One engine instance configured with one candidate vector.
pub struct Worker {
    name: String,
    kind: WorkerKind,
    dir: PathBuf,
    vector: CandidateVector,
    config: Arc<RunConfig>,
    child: Option<Child>,
    /// Last score observed by the manager's fold step
    pub last_score: Score,
}

impl Worker {
    pub fn new(
        name: String,
        kind: WorkerKind,
        vector: CandidateVector,
        config: Arc<RunConfig>,
    ) -> Self {
        let dir = config.work_dir.join(&name);
        Worker {
            name,
            kind,
            dir,
            vector,
            config,
            child: None,
            last_score: Score::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    pub fn vector(&self) -> &CandidateVector {
        &self.vector
    }

    /// Materialize and build this worker's engine: working copy,
    /// parameter overrides, shared assets, client config, binary.
    pub async fn setup(&self) -> Result<(), WorkerError> {
        self.setup_inner()
            .await
            .map_err(|source| WorkerError::Setup {
                name: self.name.clone(),
                source,
            })
    }

    async fn setup_inner(&self) -> io::Result<()> {
        let engine = &self.config.engine;
        fetch_source(&engine.repository, &engine.branch, &self.dir).await?;
        self.write_overrides().await?;
        self.link_assets().await?;
        self.write_client_config().await?;
        run_checked(&engine.build_command, &self.dir).await
    }

    /// One override line per param, consumed by the engine build.
    async fn write_overrides(&self) -> io::Result<()> {
        let mut fragment = String::new();
        for (param, value) in self.config.params.iter().zip(self.vector.values()) {
            fragment.push_str(&format!("#define {} {}\n", param.name, value));
        }
        tokio::fs::write(self.dir.join(&self.config.engine.overrides_path), fragment).await
    }

    /// Symlink the shared read-only assets into the working copy.
    async fn link_assets(&self) -> io::Result<()> {
        for asset in &self.config.engine.assets {
            let asset = tokio::fs::canonicalize(asset).await?;
            let file_name = asset
                .file_name()
                .ok_or_else(|| io::Error::other("asset path has no file name"))?;
            tokio::fs::symlink(&asset, self.dir.join(file_name)).await?;
        }
        Ok(())
    }

    /// Match-client settings; the user name is this worker's name so
    /// the transcript log stays per-worker.
    async fn write_client_config(&self) -> io::Result<()> {
        let client = &self.config.client;
        let ini = format!(
            "[Server]\n\
             Host    = {}\n\
             Port    = {}\n\
             User    = {}\n\
             \n\
             [Search]\n\
             Depth   = {}\n\
             Repeat  = {}\n\
             UseBook = {}\n\
             HashMem = {}\n",
            client.host,
            client.port,
            self.name,
            client.depth,
            client.repeat,
            u8::from(client.use_book),
            client.hash_mem,
        );
        tokio::fs::write(self.dir.join(&client.config_path), ini).await
    }

    /// Launch the built binary; it connects to the match server and
    /// plays games until killed.
    pub fn start(&mut self) -> Result<(), WorkerError> {
        if self.child.is_some() {
            return Err(WorkerError::AlreadyRunning(self.name.clone()));
        }
        let engine = &self.config.engine;
        let child = Command::new(self.dir.join(&engine.binary))
            .args(&engine.binary_args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WorkerError::Launch {
                name: self.name.clone(),
                source,
            })?;
        self.child = Some(child);
        Ok(())
    }

    /// Cumulative wins/losses parsed from the transcript log.
    pub async fn score(&self) -> Result<Score, WorkerError> {
        let path = self.dir.join(&self.config.engine.log_path);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(WorkerError::ScoreUnavailable(self.name.clone()));
            }
            Err(source) => {
                return Err(WorkerError::Transcript {
                    name: self.name.clone(),
                    source,
                });
            }
        };
        Ok(parse_transcript(&text))
    }

    /// Kill and reap the engine process. Stopping an already-stopped
    /// worker is a no-op.
    pub async fn stop(&mut self) -> Result<(), WorkerError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        child.kill().await.map_err(|source| WorkerError::Stop {
            name: self.name.clone(),
            source,
        })
    }

    /// Remove the working directory. Best-effort: failures are logged,
    /// never propagated, so cleanup cannot block shutdown.
    pub async fn cleanup(&self) {
        if let Err(err) = tokio::fs::remove_dir_all(&self.dir).await {
            if err.kind() != ErrorKind::NotFound {
                tracing::warn!(worker = %self.name, error = %err, "failed to remove working directory");
            }
        }
    }
}

/// Count terminal result lines the match client received.
fn parse_transcript(text: &str) -> Score {
    let mut score = Score::default();
    for line in text.lines() {
        let Some((_, rest)) = line.split_once("[RECV]") else {
            continue;
        };
        match rest.trim() {
            "#WIN" => score.wins += 1,
            "#LOSE" => score.losses += 1,
            _ => {}
        }
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn test_config(work_dir: &Path) -> Arc<RunConfig> {
        let mut config: RunConfig = serde_json::from_str(
            r#"{
                "params": [
                    {"name": "ALPHA", "normal": 2, "min": 1, "max": 3, "step": 1},
                    {"name": "BETA", "normal": 12, "min": 10, "max": 14, "step": 1}
                ]
            }"#,
        )
        .unwrap();
        config.work_dir = work_dir.to_path_buf();
        config.engine.repository = work_dir.join("engine-src").to_string_lossy().into_owned();
        config.engine.build_command = vec!["true".to_string()];
        config.engine.overrides_path = PathBuf::from("tunables.h");
        config.engine.log_path = PathBuf::from("netplay.log");
        config.client.config_path = PathBuf::from("netplay.ini");
        Arc::new(config)
    }

    fn make_engine_source(work_dir: &Path) {
        let src = work_dir.join("engine-src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("README"), "engine").unwrap();
    }

    fn make_worker(name: &str, config: &Arc<RunConfig>) -> Worker {
        Worker::new(
            name.to_string(),
            WorkerKind::Candidate,
            CandidateVector::new(vec![1, 12]),
            config.clone(),
        )
    }

    #[test]
    fn test_parse_transcript_counts_results() {
        let log = "\
2026-08-28T10:00:01 [SEND] LOGIN cand-0\n\
2026-08-28T10:03:11 [RECV] #WIN\n\
2026-08-28T10:07:42 [RECV]  #LOSE\n\
2026-08-28T10:09:00 [RECV] #CHUDAN\n\
2026-08-28T10:12:19 [RECV] #WIN\n";
        let score = parse_transcript(log);
        assert_eq!(score, Score::new(2, 1));
    }

    #[test]
    fn test_parse_transcript_empty_log() {
        assert_eq!(parse_transcript(""), Score::default());
    }

    #[tokio::test]
    async fn test_setup_materializes_working_copy() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        make_engine_source(tmp.path());

        let worker = make_worker("cand-0", &config);
        worker.setup().await.unwrap();

        let dir = tmp.path().join("cand-0");
        assert!(dir.join("README").exists());
        let overrides = std::fs::read_to_string(dir.join("tunables.h")).unwrap();
        assert_eq!(overrides, "#define ALPHA 1\n#define BETA 12\n");
        let ini = std::fs::read_to_string(dir.join("netplay.ini")).unwrap();
        assert!(ini.contains("User    = cand-0"));
    }

    #[tokio::test]
    async fn test_setup_failure_reports_worker_name() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        make_engine_source(tmp.path());

        // something already sits where the working copy should go
        std::fs::write(tmp.path().join("cand-0"), "in the way").unwrap();

        let worker = make_worker("cand-0", &config);
        let err = worker.setup().await.unwrap_err();
        assert!(matches!(err, WorkerError::Setup { ref name, .. } if name == "cand-0"));
    }

    #[tokio::test]
    async fn test_score_unavailable_before_first_game() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());

        let worker = make_worker("cand-0", &config);
        assert!(matches!(
            worker.score().await,
            Err(WorkerError::ScoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_score_reads_cumulative_counts() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());

        let dir = tmp.path().join("cand-0");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("netplay.log"),
            "x [RECV] #WIN\nx [RECV] #WIN\nx [RECV] #LOSE\n",
        )
        .unwrap();

        let worker = make_worker("cand-0", &config);
        assert_eq!(worker.score().await.unwrap(), Score::new(2, 1));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());

        let mut worker = make_worker("cand-0", &config);
        assert!(worker.stop().await.is_ok());
        assert!(worker.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected_until_stopped() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = test_config(tmp.path());
        {
            let config = Arc::get_mut(&mut config).unwrap();
            config.engine.binary = PathBuf::from("engine.sh");
            config.engine.binary_args = vec![];
        }

        let dir = tmp.path().join("cand-0");
        std::fs::create_dir_all(&dir).unwrap();
        let script = dir.join("engine.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let mut worker = make_worker("cand-0", &config);
        worker.start().unwrap();
        assert!(matches!(
            worker.start(),
            Err(WorkerError::AlreadyRunning(_))
        ));
        worker.stop().await.unwrap();
        worker.start().unwrap();
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_removes_working_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());

        let dir = tmp.path().join("cand-0");
        std::fs::create_dir_all(&dir).unwrap();

        let worker = make_worker("cand-0", &config);
        worker.cleanup().await;
        assert!(!dir.exists());

        // best-effort: a second cleanup of a gone directory is fine
        worker.cleanup().await;
    }
}
