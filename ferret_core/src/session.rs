use crate::artifact::{ArtifactError, SessionReport, write_fault_artifact};
use crate::config::FerretConfig;
use crate::corpus::{Corpus, FaultRegistry};
use crate::harness::{Harness, HarnessError, Outcome};
use crate::loader::{LoadError, ModuleLoader, Target, namespace_of};
use crate::mutate::MutationEngine;
use crate::synth::{describe_call, seed_buffer, synthesize};
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Stopped,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Target setup failed: {0}")]
    Setup(String),
    #[error("Target invocation failed: {0}")]
    Invoke(String),
    #[error("Artifact write failed: {0}")]
    Artifact(String),
}

impl From<LoadError> for SessionError {
    fn from(error: LoadError) -> Self {
        SessionError::Setup(error.to_string())
    }
}

impl From<HarnessError> for SessionError {
    fn from(error: HarnessError) -> Self {
        SessionError::Invoke(error.to_string())
    }
}

impl From<ArtifactError> for SessionError {
    fn from(error: ArtifactError) -> Self {
        SessionError::Artifact(error.to_string())
    }
}

/// One fuzzing run against a single target function.
///
/// The session owns every moving part: the corpus, the mutation engine,
/// the harness with its loader, the fault registry, and the one RNG that
/// feeds selection and mutation. With a fixed seed the whole run replays
/// event for event.
pub struct Session {
    config: FerretConfig,
    state: SessionState,
    harness: Harness,
    target: Target,
    engine: MutationEngine,
    corpus: Corpus,
    registry: FaultRegistry,
    rng: ChaCha8Rng,
    seed: u64,
}

impl Session {
    /// Builds a session whose loader pulls `.fmod` files from the
    /// configured search paths on demand.
    pub fn new(config: FerretConfig) -> Result<Self, SessionError> {
        let loader = ModuleLoader::new(
            config.search_paths.clone(),
            namespace_of(&config.target.module),
        );
        Self::with_loader(config, loader)
    }

    /// Builds a session around a caller-prepared loader, so embedders can
    /// register in-memory modules before the target resolves.
    pub fn with_loader(
        config: FerretConfig,
        mut loader: ModuleLoader,
    ) -> Result<Self, SessionError> {
        let target = loader.resolve(&config.target.module, &config.target.function)?;
        let seed = config.session.seed.unwrap_or_else(rand::random);
        let rng = ChaCha8Rng::seed_from_u64(seed);
        let engine = MutationEngine::new(config.session.buffer_len);

        // Preset documents occupy synthetic signatures starting at 1.
        let mut corpus = Corpus::new();
        for (slot, document) in config.session.seed_inputs.iter().enumerate() {
            corpus.insert_if_new(
                slot as u64 + 1,
                seed_buffer(document, config.session.buffer_len),
            );
        }

        let harness = Harness::new(loader, config.interp.options());
        Ok(Self {
            config,
            state: SessionState::Idle,
            harness,
            target,
            engine,
            corpus,
            registry: FaultRegistry::new(),
            rng,
            seed,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The seed this session runs under, whether configured or drawn.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn registry(&self) -> &FaultRegistry {
        &self.registry
    }

    /// Drives the select, mutate, synthesize, invoke cycle until the
    /// wall-clock budget or the optional iteration cap runs out.
    pub fn run(&mut self) -> Result<SessionReport, SessionError> {
        self.state = SessionState::Running;
        let budget = Duration::from_secs(self.config.session.timeout_secs);
        let started = Instant::now();

        let mut iterations = 0u64;
        let mut skipped = 0u64;
        let mut artifacts: Vec<PathBuf> = Vec::new();

        while started.elapsed() < budget {
            if let Some(cap) = self.config.session.max_iterations {
                if iterations >= cap {
                    break;
                }
            }
            iterations += 1;

            let candidate = {
                let seed_input = self.corpus.select(&mut self.rng);
                self.engine.mutate(seed_input, &mut self.rng)
            };

            let args = match synthesize(&self.target.params, &candidate) {
                Ok(args) => args,
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            };

            match self.harness.invoke(&self.target, &args)? {
                Outcome::Completed { signature } => {
                    if self.corpus.insert_if_new(signature, candidate) {
                        println!("New seed added: {signature:#x}");
                    }
                }
                // The failing input stays out of the corpus: its coverage
                // stops at the fault and would stall later mutation.
                Outcome::Faulted { fault, signature } => {
                    let kind = fault.kind.qualified();
                    if self.registry.admit(&kind) {
                        println!("New fault found: {kind}");
                        let call = describe_call(&self.target.name, &args);
                        let path = write_fault_artifact(
                            &self.config.artifacts.dir,
                            &fault,
                            signature,
                            &call,
                            &candidate,
                        )?;
                        println!("Saved to: {}", path.display());
                        artifacts.push(path);
                    }
                }
            }
        }

        self.state = SessionState::Stopped;
        Ok(SessionReport {
            target: self.target.qualified_name(),
            seed: self.seed,
            iterations,
            skipped,
            corpus_size: self.corpus.len(),
            fault_kinds: self.registry.kinds(),
            artifacts,
            elapsed_ms: started.elapsed().as_millis(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::test_targets::pages_module;
    use crate::config::{ArtifactSettings, InterpSettings, SessionSettings, TargetSettings};
    use std::path::Path;
    use tempfile::tempdir;

    fn test_config(function: &str, seed: u64, cap: Option<u64>, dir: &Path) -> FerretConfig {
        FerretConfig {
            target: TargetSettings {
                module: "demo.pages".to_string(),
                function: function.to_string(),
            },
            search_paths: vec![],
            session: SessionSettings {
                timeout_secs: 30,
                seed: Some(seed),
                max_iterations: cap,
                buffer_len: 64,
                ..SessionSettings::default()
            },
            interp: InterpSettings::default(),
            artifacts: ArtifactSettings {
                dir: dir.to_path_buf(),
                report_json: None,
            },
        }
    }

    fn test_session(function: &str, seed: u64, cap: Option<u64>, dir: &Path) -> Session {
        let mut loader = ModuleLoader::new(vec![], "demo");
        loader.register(pages_module()).unwrap();
        Session::with_loader(test_config(function, seed, cap, dir), loader).unwrap()
    }

    #[test]
    fn preset_documents_seed_the_corpus() {
        let dir = tempdir().unwrap();
        let session = test_session("parse", 1, Some(10), dir.path());
        assert_eq!(session.corpus().len(), 3);
        let signatures: Vec<u64> = session.corpus().signatures().collect();
        assert_eq!(signatures, vec![1, 2, 3]);
        assert_eq!(session.seed(), 1);
    }

    #[test]
    fn session_walks_idle_to_stopped() {
        let dir = tempdir().unwrap();
        let mut session = test_session("sum", 5, Some(20), dir.path());
        assert_eq!(session.state(), SessionState::Idle);
        session.run().unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    fn zero_timeout_stops_before_the_first_iteration() {
        let dir = tempdir().unwrap();
        let mut loader = ModuleLoader::new(vec![], "demo");
        loader.register(pages_module()).unwrap();
        let mut config = test_config("parse", 1, None, dir.path());
        config.session.timeout_secs = 0;
        let mut session = Session::with_loader(config, loader).unwrap();

        let report = session.run().unwrap();
        assert_eq!(report.iterations, 0);
        assert_eq!(report.corpus_size, 3);
        assert!(report.fault_kinds.is_empty());
    }

    #[test]
    fn fixed_seed_sessions_replay_identically() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();
        let mut first = test_session("sum", 7, Some(300), dir_a.path());
        let mut second = test_session("sum", 7, Some(300), dir_b.path());

        let report_a = first.run().unwrap();
        let report_b = second.run().unwrap();

        assert_eq!(report_a.iterations, 300);
        assert_eq!(report_a.iterations, report_b.iterations);
        assert_eq!(report_a.skipped, report_b.skipped);
        assert_eq!(report_a.corpus_size, report_b.corpus_size);
        assert_eq!(report_a.fault_kinds, report_b.fault_kinds);
        let signatures_a: Vec<u64> = first.corpus().signatures().collect();
        let signatures_b: Vec<u64> = second.corpus().signatures().collect();
        assert_eq!(signatures_a, signatures_b);
    }

    #[test]
    fn new_signatures_grow_the_corpus() {
        let dir = tempdir().unwrap();
        let mut session = test_session("sum", 11, Some(300), dir.path());
        let report = session.run().unwrap();

        // Array arguments of different lengths walk different loop counts,
        // so fresh signatures show up well within the cap.
        assert!(
            report.corpus_size > 3,
            "corpus stayed at {}",
            report.corpus_size
        );
        assert!(report.fault_kinds.is_empty());
    }

    #[test]
    fn short_buffers_skip_oversized_markup_arguments() {
        let dir = tempdir().unwrap();
        let mut session = test_session("parse", 13, Some(100), dir.path());
        let report = session.run().unwrap();

        // Two of the preset documents ask for more generation steps than a
        // 64-byte buffer can pay for.
        assert!(report.skipped > 0, "no iteration was skipped");
        assert_eq!(report.iterations, 100);
    }

    #[test]
    fn each_fault_kind_lands_exactly_one_artifact() {
        let dir = tempdir().unwrap();
        let mut session = test_session("check", 3, Some(5000), dir.path());
        let report = session.run().unwrap();

        assert_eq!(
            report.fault_kinds,
            vec!["demo.pages::NegativeArgument".to_string()]
        );
        assert_eq!(report.artifacts.len(), 1);
        let path = dir.path().join("reportNegativeArgument.txt");
        assert_eq!(report.artifacts[0], path);
        assert!(path.exists());
        assert!(session.registry().contains("demo.pages::NegativeArgument"));
        assert_eq!(report.skipped, 0);
    }

    #[test]
    fn parser_faults_stay_namespaced_and_on_disk() {
        let dir = tempdir().unwrap();
        let mut session = test_session("parse", 17, Some(300), dir.path());
        let report = session.run().unwrap();

        assert!(!report.fault_kinds.is_empty());
        assert!(
            report
                .fault_kinds
                .iter()
                .all(|kind| kind.starts_with("demo.pages::"))
        );
        assert_eq!(report.artifacts.len(), report.fault_kinds.len());
        for artifact in &report.artifacts {
            assert!(artifact.exists());
        }
    }
}
