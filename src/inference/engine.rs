//! Inference engine implementation
//!
//! Loads a GGUF model through llama-cpp and runs single, blocking
//! completions against it.
//!
//! # Architecture
//!
//! llama-cpp-2 types (`LlamaBackend`, `LlamaModel`, `LlamaContext`) contain
//! raw pointers that are not `Send`, so they all live on one dedicated worker
//! thread. Callers talk to it over a command channel and every generation
//! request brings its own reply channel and stop signal. A caller that stops
//! waiting raises the signal: a queued request is skipped, a running one ends
//! at the next token, and any late reply goes nowhere.
//!
//! One worker also means one generation at a time: concurrent requests queue
//! behind each other instead of sharing inference state.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inference::model::{validate_gguf, ModelError};
use crate::inference::outcome::{InferenceOutcome, ModelState, TextGenerator};
use crate::inference::prompt::default_stop_sequences;

/// How many recent tokens the repeat penalty looks at
const PENALTY_LAST_N: i32 = 64;

/// Errors that can occur during inference operations
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("Model file {0} does not exist")]
    ModelMissing(PathBuf),

    #[error("Failed to initialize backend: {0}")]
    BackendInit(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Failed to create context: {0}")]
    ContextCreate(String),

    #[error("Model validation failed: {0}")]
    ModelValidation(String),

    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Worker thread error: {0}")]
    WorkerError(String),
}

impl From<ModelError> for EngineError {
    fn from(e: ModelError) -> Self {
        EngineError::ModelValidation(e.to_string())
    }
}

/// Sampling parameters for one completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Maximum number of tokens to generate
    pub max_tokens: u32,
    /// Temperature for sampling (0.0 = greedy, higher = more random)
    pub temperature: f32,
    /// Top-p (nucleus) sampling parameter
    pub top_p: f32,
    /// Repetition penalty
    pub repeat_penalty: f32,
    /// Generation stops as soon as one of these appears in the output
    pub stop_sequences: Vec<String>,
    /// Random seed for sampling (0 = random)
    pub seed: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 128,
            temperature: 0.7,
            top_p: 0.95,
            repeat_penalty: 1.1,
            stop_sequences: default_stop_sequences(),
            seed: 0,
        }
    }
}

/// Model loading parameters, sized for boards with little memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeParams {
    /// Context window in tokens
    pub context_size: u32,
    /// Tokens decoded per batch
    pub batch_size: u32,
    /// Threads used for the arithmetic
    pub threads: i32,
    /// Layers offloaded when an accelerator is present
    pub accelerated_gpu_layers: u32,
}

impl Default for RuntimeParams {
    fn default() -> Self {
        Self {
            context_size: 512,
            batch_size: 8,
            threads: 2,
            accelerated_gpu_layers: 1,
        }
    }
}

impl RuntimeParams {
    /// Layers to offload given the accelerator flag
    pub fn gpu_layers(&self, accelerated: bool) -> u32 {
        if accelerated {
            self.accelerated_gpu_layers
        } else {
            0
        }
    }
}

/// Model information after loading
#[derive(Debug, Clone)]
pub struct LoadedModelInfo {
    /// Path to the loaded model
    pub path: String,
    /// Vocabulary size
    pub vocab_size: i32,
    /// Training context length
    pub context_length: u32,
    /// Total parameter count
    pub param_count: u64,
    /// Model size in bytes
    pub size_bytes: u64,
    /// Layers offloaded to the GPU
    pub gpu_layers: u32,
}

/// Commands sent to the worker thread
enum WorkerCommand {
    LoadModel {
        path: PathBuf,
        runtime: RuntimeParams,
        gpu_layers: u32,
        response_tx: Sender<Result<LoadedModelInfo, EngineError>>,
    },
    Generate {
        prompt: String,
        params: GenerationParams,
        response_tx: Sender<Result<String, EngineError>>,
        stop_signal: Arc<AtomicBool>,
    },
    Shutdown,
}

/// A loaded llama.cpp model
///
/// Only exists once loading succeeded; use [`LlamaEngine::initialize`] to get
/// a [`ModelState`] either way.
pub struct LlamaEngine {
    /// Channel to send commands to the worker thread
    command_tx: Sender<WorkerCommand>,
}

impl LlamaEngine {
    /// Try to load the model at `path`, recording failure instead of returning it.
    ///
    /// A missing or broken model file is not fatal: the process keeps
    /// serving from the fallback responder for its whole lifetime.
    pub fn initialize<P: AsRef<Path>>(path: P, accelerated: bool, runtime: &RuntimeParams) -> ModelState {
        let path = path.as_ref();
        tracing::info!("Loading model from {}", path.display());

        match Self::load(path, accelerated, runtime) {
            Ok(engine) => {
                tracing::info!("Model loaded successfully");
                ModelState::Loaded(Arc::new(engine))
            }
            Err(e) => {
                tracing::error!("Error loading model: {}", e);
                tracing::info!("Falling back to rule-based responses");
                ModelState::Unavailable(e.to_string())
            }
        }
    }

    /// Loads a GGUF model on a fresh worker thread
    ///
    /// # Arguments
    /// * `path` - Path to the GGUF model file
    /// * `accelerated` - Whether to offload layers to the GPU
    /// * `runtime` - Context, batch and thread sizes
    pub fn load(path: &Path, accelerated: bool, runtime: &RuntimeParams) -> Result<Self, EngineError> {
        if !path.exists() {
            return Err(EngineError::ModelMissing(path.to_path_buf()));
        }

        // Validate GGUF file first (on the calling thread, just file I/O)
        let header = validate_gguf(path)?;
        tracing::debug!("GGUF v{} with {} tensors at {:?}", header.version, header.tensor_count, path);

        let gpu_layers = runtime.gpu_layers(accelerated);
        tracing::info!("Using GPU layers: {}", gpu_layers);

        let (command_tx, command_rx) = mpsc::channel::<WorkerCommand>();

        // Spawn worker thread that owns the backend and model
        thread::Builder::new()
            .name("llama-worker".to_string())
            .spawn(move || worker_thread_main(command_rx))
            .map_err(|e| EngineError::WorkerError(e.to_string()))?;

        let (response_tx, response_rx) = mpsc::channel();
        command_tx
            .send(WorkerCommand::LoadModel {
                path: path.to_path_buf(),
                runtime: runtime.clone(),
                gpu_layers,
                response_tx,
            })
            .map_err(|e| EngineError::WorkerError(e.to_string()))?;

        let info = response_rx
            .recv()
            .map_err(|e| EngineError::WorkerError(e.to_string()))??;
        tracing::info!("Model ready: {} ({} bytes)", info.path, info.size_bytes);

        Ok(Self { command_tx })
    }

    /// Run one completion and wait for the raw text
    fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
        stop_signal: &Arc<AtomicBool>,
    ) -> Result<String, EngineError> {
        let (response_tx, response_rx) = mpsc::channel();

        self.command_tx
            .send(WorkerCommand::Generate {
                prompt: prompt.to_string(),
                params: params.clone(),
                response_tx,
                stop_signal: Arc::clone(stop_signal),
            })
            .map_err(|e| EngineError::WorkerError(e.to_string()))?;

        response_rx
            .recv()
            .map_err(|e| EngineError::WorkerError(e.to_string()))?
    }
}

impl TextGenerator for LlamaEngine {
    /// Elapsed time includes any wait behind another request on the worker.
    fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        stop_signal: &Arc<AtomicBool>,
    ) -> InferenceOutcome {
        let started = Instant::now();
        let raw = self.complete(prompt, params, stop_signal);
        let elapsed = started.elapsed();

        match &raw {
            Ok(text) => tracing::info!(
                elapsed_ms = elapsed.as_millis() as u64,
                "Response generated in {:.2} seconds: {}...",
                elapsed.as_secs_f64(),
                crate::truncate_str(text.trim(), 50)
            ),
            Err(EngineError::Cancelled) => tracing::debug!("Generation abandoned by caller"),
            Err(e) => tracing::error!("Error during model inference: {}", e),
        }

        InferenceOutcome::classify(raw, elapsed)
    }
}

impl Drop for LlamaEngine {
    fn drop(&mut self) {
        // The worker may be mid-generation; it exits after the current command
        // instead of being joined here.
        let _ = self.command_tx.send(WorkerCommand::Shutdown);
    }
}

/// Worker thread main loop
///
/// Owns the LlamaBackend and LlamaModel, processes commands in order.
fn worker_thread_main(command_rx: Receiver<WorkerCommand>) {
    let mut backend: Option<LlamaBackend> = None;
    let mut model: Option<(LlamaModel, RuntimeParams)> = None;

    loop {
        match command_rx.recv() {
            Ok(WorkerCommand::LoadModel {
                path,
                runtime,
                gpu_layers,
                response_tx,
            }) => {
                let result = load_model_internal(&mut backend, &path, gpu_layers).map(|(m, info)| {
                    model = Some((m, runtime));
                    info
                });
                let _ = response_tx.send(result);
            }
            Ok(WorkerCommand::Generate {
                prompt,
                params,
                response_tx,
                stop_signal,
            }) => {
                // A request may have been abandoned while it sat in the queue
                let result = check_stop(&stop_signal).and_then(|()| match (&backend, &model) {
                    (Some(b), Some((m, runtime))) => {
                        run_generation(b, m, runtime, &prompt, &params, &stop_signal)
                    }
                    _ => Err(EngineError::WorkerError("No model loaded".to_string())),
                });
                if response_tx.send(result).is_err() {
                    tracing::debug!("Caller stopped waiting, discarding generation result");
                }
            }
            Ok(WorkerCommand::Shutdown) => {
                tracing::info!("Worker thread shutting down");
                break;
            }
            Err(_) => {
                // Channel closed, exit
                tracing::debug!("Command channel closed, worker exiting");
                break;
            }
        }
    }
}

/// Initialize the backend if needed, then load the model (helper for worker thread)
fn load_model_internal(
    backend: &mut Option<LlamaBackend>,
    path: &Path,
    gpu_layers: u32,
) -> Result<(LlamaModel, LoadedModelInfo), EngineError> {
    if backend.is_none() {
        let mut b = LlamaBackend::init().map_err(|e| EngineError::BackendInit(e.to_string()))?;
        b.void_logs();
        tracing::info!("LlamaBackend initialized in worker thread");
        *backend = Some(b);
    }
    let Some(backend) = backend.as_ref() else {
        return Err(EngineError::BackendInit("backend unavailable".to_string()));
    };

    let model_params = LlamaModelParams::default().with_n_gpu_layers(gpu_layers);
    let model = LlamaModel::load_from_file(backend, path, &model_params)
        .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

    let info = LoadedModelInfo {
        path: path.to_string_lossy().to_string(),
        vocab_size: model.n_vocab(),
        context_length: model.n_ctx_train(),
        param_count: model.n_params() as u64,
        size_bytes: model.size() as u64,
        gpu_layers,
    };

    tracing::info!(
        "Model info: {} ({} params, {} vocab, {} ctx, {} gpu layers)",
        info.path,
        info.param_count,
        info.vocab_size,
        info.context_length,
        info.gpu_layers
    );

    Ok((model, info))
}

/// Run text generation (called from worker thread)
fn run_generation(
    backend: &LlamaBackend,
    model: &LlamaModel,
    runtime: &RuntimeParams,
    prompt: &str,
    params: &GenerationParams,
    stop_signal: &AtomicBool,
) -> Result<String, EngineError> {
    let n_ctx = NonZeroU32::new(runtime.context_size)
        .ok_or_else(|| EngineError::ContextCreate("context size must be non-zero".to_string()))?;

    let ctx_params = LlamaContextParams::default()
        .with_n_ctx(Some(n_ctx))
        .with_n_batch(runtime.batch_size)
        .with_n_threads(runtime.threads)
        .with_n_threads_batch(runtime.threads);

    let mut ctx = model
        .new_context(backend, ctx_params)
        .map_err(|e| EngineError::ContextCreate(e.to_string()))?;

    let tokens = model
        .str_to_token(prompt, AddBos::Always)
        .map_err(|e| EngineError::Tokenization(e.to_string()))?;

    if tokens.is_empty() || tokens.len() >= runtime.context_size as usize {
        return Err(EngineError::Tokenization(format!(
            "prompt of {} tokens does not fit a {} token context",
            tokens.len(),
            runtime.context_size
        )));
    }

    tracing::debug!("Tokenized prompt into {} tokens", tokens.len());

    run_inference(&mut ctx, model, runtime, tokens, params, stop_signal)
}

/// Feed the prompt in batch-sized chunks, then sample until a stop condition
fn run_inference(
    ctx: &mut LlamaContext,
    model: &LlamaModel,
    runtime: &RuntimeParams,
    prompt_tokens: Vec<LlamaToken>,
    params: &GenerationParams,
    stop_signal: &AtomicBool,
) -> Result<String, EngineError> {
    let chunk_len = runtime.batch_size.max(1) as usize;
    let mut batch = LlamaBatch::new(chunk_len, 1);
    let last = prompt_tokens.len() - 1;

    for (chunk_index, chunk) in prompt_tokens.chunks(chunk_len).enumerate() {
        check_stop(stop_signal)?;
        batch.clear();
        for (offset, token) in chunk.iter().enumerate() {
            let pos = chunk_index * chunk_len + offset;
            batch
                .add(*token, pos as i32, &[0], pos == last)
                .map_err(|e| EngineError::Inference(format!("Failed to add token to batch: {}", e)))?;
        }
        ctx.decode(&mut batch)
            .map_err(|e| EngineError::Inference(format!("Failed to decode prompt: {}", e)))?;
    }

    let mut sampler = build_sampler(params);
    let mut n_decoded = prompt_tokens.len() as i32;
    let mut output = String::new();
    // Buffer for handling incomplete UTF-8 sequences
    let mut utf8_buffer: Vec<u8> = Vec::new();

    for _ in 0..params.max_tokens {
        check_stop(stop_signal)?;

        if n_decoded as u32 >= runtime.context_size {
            tracing::debug!("Context window full, stopping generation");
            break;
        }

        let new_token = sampler.sample(ctx, batch.n_tokens() - 1);

        if model.is_eog_token(new_token) {
            tracing::debug!("End of generation token encountered");
            break;
        }

        let token_bytes = model
            .token_to_bytes(new_token, Special::Tokenize)
            .map_err(|e| EngineError::Inference(format!("Failed to convert token to bytes: {}", e)))?;
        utf8_buffer.extend_from_slice(&token_bytes);
        drain_utf8(&mut utf8_buffer, &mut output);

        if let Some(cut) = find_stop_sequence(&output, &params.stop_sequences) {
            output.truncate(cut);
            utf8_buffer.clear();
            tracing::debug!("Stop sequence reached");
            break;
        }

        // Prepare batch for next iteration
        batch.clear();
        batch
            .add(new_token, n_decoded, &[0], true)
            .map_err(|e| EngineError::Inference(format!("Failed to add token to batch: {}", e)))?;
        ctx.decode(&mut batch)
            .map_err(|e| EngineError::Inference(format!("Failed to decode: {}", e)))?;

        n_decoded += 1;
    }

    if !utf8_buffer.is_empty() {
        output.push_str(&String::from_utf8_lossy(&utf8_buffer));
    }

    Ok(output)
}

fn build_sampler(params: &GenerationParams) -> LlamaSampler {
    let penalties = LlamaSampler::penalties(PENALTY_LAST_N, params.repeat_penalty, 0.0, 0.0);

    if params.temperature < 0.01 {
        // Use greedy sampling for very low temperature
        return LlamaSampler::chain_simple([penalties, LlamaSampler::greedy()]);
    }

    let seed = if params.seed == 0 {
        rand_seed()
    } else {
        params.seed
    };

    LlamaSampler::chain_simple([
        penalties,
        LlamaSampler::top_p(params.top_p, 1),
        LlamaSampler::temp(params.temperature),
        LlamaSampler::dist(seed),
    ])
}

/// Move the longest valid UTF-8 prefix of `buffer` into `out`.
///
/// An incomplete trailing sequence stays in the buffer; bytes that can never
/// become valid are replaced.
fn drain_utf8(buffer: &mut Vec<u8>, out: &mut String) {
    match std::str::from_utf8(buffer) {
        Ok(s) => {
            out.push_str(s);
            buffer.clear();
        }
        Err(e) => {
            let valid = e.valid_up_to();
            // valid_up_to guarantees this prefix is UTF-8
            out.push_str(&String::from_utf8_lossy(&buffer[..valid]));
            match e.error_len() {
                Some(bad) => {
                    out.push(char::REPLACEMENT_CHARACTER);
                    buffer.drain(..valid + bad);
                    drain_utf8(buffer, out);
                }
                None => {
                    buffer.drain(..valid);
                }
            }
        }
    }
}

/// Fails once the caller has given up on this generation
fn check_stop(stop_signal: &AtomicBool) -> Result<(), EngineError> {
    if stop_signal.load(Ordering::Relaxed) {
        tracing::debug!("Generation stopped, caller gave up");
        return Err(EngineError::Cancelled);
    }
    Ok(())
}

/// Byte offset of the earliest stop sequence in `text`
fn find_stop_sequence(text: &str, stops: &[String]) -> Option<usize> {
    stops
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min()
}

/// Generates a random seed using system entropy
fn rand_seed() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_params_default() {
        let params = GenerationParams::default();
        assert_eq!(params.max_tokens, 128);
        assert!((params.temperature - 0.7).abs() < 0.001);
        assert!((params.top_p - 0.95).abs() < 0.001);
        assert!((params.repeat_penalty - 1.1).abs() < 0.001);
        assert_eq!(params.stop_sequences, vec!["<human>:", "\n<human>"]);
    }

    #[test]
    fn test_gpu_layers_follow_capability() {
        let runtime = RuntimeParams::default();
        assert_eq!(runtime.gpu_layers(true), 1);
        assert_eq!(runtime.gpu_layers(false), 0);
    }

    #[test]
    fn test_find_stop_sequence_earliest() {
        let stops = vec!["<human>:".to_string(), "\n<human>".to_string()];
        let text = "Sure thing.\n<human>: and then";
        assert_eq!(find_stop_sequence(text, &stops), Some(11));
        assert_eq!(find_stop_sequence("no stop here", &stops), None);
        assert_eq!(find_stop_sequence("anything", &[String::new()]), None);
    }

    #[test]
    fn test_check_stop() {
        let stop_signal = AtomicBool::new(false);
        assert!(check_stop(&stop_signal).is_ok());

        stop_signal.store(true, Ordering::Relaxed);
        assert!(matches!(check_stop(&stop_signal), Err(EngineError::Cancelled)));
    }

    #[test]
    fn test_drain_utf8_keeps_partial_sequence() {
        let mut out = String::new();
        // "é" is 0xC3 0xA9; feed the first byte alone
        let mut buffer = vec![b'a', 0xC3];
        drain_utf8(&mut buffer, &mut out);
        assert_eq!(out, "a");
        assert_eq!(buffer, vec![0xC3]);

        buffer.push(0xA9);
        drain_utf8(&mut buffer, &mut out);
        assert_eq!(out, "aé");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_utf8_replaces_invalid_bytes() {
        let mut out = String::new();
        let mut buffer = vec![b'x', 0xFF, b'y'];
        drain_utf8(&mut buffer, &mut out);
        assert_eq!(out, "x\u{FFFD}y");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_missing_model_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tinyllama.gguf");
        let state = LlamaEngine::initialize(&path, false, &RuntimeParams::default());
        match state {
            ModelState::Unavailable(reason) => assert!(reason.contains("does not exist")),
            other => panic!("expected Unavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_model_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tinyllama.gguf");
        std::fs::write(&path, b"<html>404 Not Found</html> padding bytes").unwrap();
        let state = LlamaEngine::initialize(&path, true, &RuntimeParams::default());
        match state {
            ModelState::Unavailable(reason) => assert!(reason.contains("magic")),
            other => panic!("expected Unavailable, got {:?}", other),
        }
    }
}
