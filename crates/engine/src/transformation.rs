//! The transformation driver: a step function over one [`Engine`] plus the
//! policies around it (output sink selection, document loads, host
//! notifications).

use crate::config::TransformConfig;
use crate::engine::{Engine, Progress};
use crate::error::TransformError;
use crate::evaluator::{Dependency, Evaluator};
use crate::messages::{Diagnostic, MessageDisposition, MessageKind};
use crate::stylesheet::Stylesheet;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;
use xsltvm_output::{
    CharacterSink, OutputMethod, OutputSpecification, RecordingSink, Sink, TeeSink, TokenConsumer,
    TokenStreamAdapter,
};
use xsltvm_tree::TreeAccess;
use xsltvm_types::{DocumentUri, QualifiedName};

/// Identifies one outstanding document load.
pub type LoadHandle = u64;

/// Loads documents requested through `document()`. The loader reports back
/// through [`Transformation::parsing_finished`].
pub trait DocumentLoader {
    /// Starts loading `uri`. `None` means the load could not be started, and
    /// the document is treated as absent.
    fn load_document(&mut self, uri: &DocumentUri) -> Option<LoadHandle>;

    fn cancel_load_document(&mut self, handle: LoadHandle);
}

/// Callbacks into the application running the transformation.
pub trait TransformationHost {
    /// A blocked transformation can make progress again.
    fn continue_transformation(&mut self) {}

    fn handle_message(&mut self, _kind: MessageKind, _text: &str) -> MessageDisposition {
        MessageDisposition::Unhandled
    }
}

/// Where the result goes.
pub enum OutputTarget {
    /// Serialized as XML, HTML or text.
    Characters(Box<dyn CharacterSink>),
    /// Forwarded as markup tokens; no serializer is involved.
    Tokens(Box<dyn TokenConsumer>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformationState {
    NotStarted,
    Running,
    Blocked,
    Paused,
    NeedsOutputDecision,
    Finished,
    Failed,
}

impl fmt::Display for TransformationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransformationState::NotStarted => "NOT_STARTED",
            TransformationState::Running => "RUNNING",
            TransformationState::Blocked => "BLOCKED",
            TransformationState::Paused => "PAUSED",
            TransformationState::NeedsOutputDecision => "NEEDS_OUTPUT_DECISION",
            TransformationState::Finished => "FINISHED",
            TransformationState::Failed => "FAILED",
        })
    }
}

/// Result of one [`Transformation::step`]. Failures are returned as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Call `step` again.
    Paused,
    /// Waiting for `parsing_finished`.
    Blocked,
    /// Call `set_output_method` or `confirm_output_method`.
    NeedsOutputDecision(OutputMethod),
    Finished,
}

pub struct Transformation {
    engine: Engine,
    config: TransformConfig,
    output: OutputSpecification,
    state: TransformationState,
    /// The character target until a serializer has been built for it.
    target: Option<Box<dyn CharacterSink>>,
    detected: Option<OutputMethod>,
    loader: Option<Box<dyn DocumentLoader>>,
    host: Option<Box<dyn TransformationHost>>,
    pending_loads: Vec<(LoadHandle, DocumentUri)>,
    diagnostics: Vec<Diagnostic>,
}

impl Transformation {
    pub fn new(
        stylesheet: Arc<Stylesheet>,
        evaluator: Box<dyn Evaluator>,
        input: Box<dyn TreeAccess>,
        target: OutputTarget,
        config: TransformConfig,
    ) -> Result<Self, TransformError> {
        config.validate()?;
        let output = config
            .output
            .clone()
            .unwrap_or_else(|| stylesheet.output.clone());

        let (sink, target) = match target {
            OutputTarget::Tokens(consumer) => {
                let sink = Sink::Tokens(TokenStreamAdapter::new(consumer));
                (tee(sink, output.method.unwrap_or(OutputMethod::Xml), &output, &config), None)
            }
            OutputTarget::Characters(out) => match output.method {
                Some(method) => (
                    tee(Sink::serializer(method, &output, out), method, &output, &config),
                    None,
                ),
                None => (Sink::Recording(RecordingSink::new()), Some(out)),
            },
        };
        log::debug!("Transformation starts with {} output", sink.kind());
        let engine = Engine::new(stylesheet, evaluator, input, sink, config.max_recursion_depth)?;

        Ok(Self {
            engine,
            config,
            output,
            state: TransformationState::NotStarted,
            target,
            detected: None,
            loader: None,
            host: None,
            pending_loads: Vec::new(),
            diagnostics: Vec::new(),
        })
    }

    pub fn with_loader(mut self, loader: Box<dyn DocumentLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_host(mut self, host: Box<dyn TransformationHost>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn state(&self) -> TransformationState {
        self.state
    }

    /// Every message, warning and error reported so far.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Overrides a top-level `xsl:param`. Only valid before the first step.
    pub fn set_parameter(
        &mut self,
        name: impl Into<QualifiedName>,
        value: Value,
    ) -> Result<(), TransformError> {
        if self.state != TransformationState::NotStarted {
            return Err(TransformError::invalid_state(self.state, "set_parameter"));
        }
        self.engine.set_parameter(name.into(), value);
        Ok(())
    }

    /// Runs one time slice.
    pub fn step(&mut self) -> Result<Status, TransformError> {
        match self.state {
            TransformationState::Finished => return Ok(Status::Finished),
            TransformationState::Failed | TransformationState::NeedsOutputDecision => {
                return Err(TransformError::invalid_state(self.state, "step"));
            }
            TransformationState::Blocked if !self.pending_loads.is_empty() => {
                return Ok(Status::Blocked);
            }
            _ => {}
        }

        self.state = TransformationState::Running;
        let progress = self.engine.execute(self.config.instruction_budget);
        self.forward_messages();
        let progress = match progress {
            Ok(progress) => progress,
            Err(error) => return Err(self.fail(error)),
        };

        match progress {
            Progress::Paused => {
                log::debug!("Time slice of {} instructions used up", self.config.instruction_budget);
                self.state = TransformationState::Paused;
                Ok(Status::Paused)
            }
            Progress::Completed if self.target.is_some() => {
                // Nothing decided the method before the end of output.
                let method = OutputMethod::Xml;
                self.detected = Some(method);
                if self.config.defer_output_decision {
                    self.state = TransformationState::NeedsOutputDecision;
                    return Ok(Status::NeedsOutputDecision(method));
                }
                if let Err(error) = self.switch_output(method) {
                    return Err(self.fail(error));
                }
                log::debug!("Transformation finished");
                self.state = TransformationState::Finished;
                Ok(Status::Finished)
            }
            Progress::Completed => {
                log::debug!("Transformation finished");
                self.state = TransformationState::Finished;
                Ok(Status::Finished)
            }
            Progress::OutputDecision(method) => {
                self.detected = Some(method);
                if self.config.defer_output_decision {
                    self.state = TransformationState::NeedsOutputDecision;
                    return Ok(Status::NeedsOutputDecision(method));
                }
                if let Err(error) = self.switch_output(method) {
                    return Err(self.fail(error));
                }
                self.state = TransformationState::Paused;
                Ok(Status::Paused)
            }
            Progress::Blocked(Dependency::Document(uri)) => {
                if let Err(error) = self.request_document(uri) {
                    return Err(self.fail(error));
                }
                if self.pending_loads.is_empty() {
                    self.state = TransformationState::Paused;
                    Ok(Status::Paused)
                } else {
                    self.state = TransformationState::Blocked;
                    Ok(Status::Blocked)
                }
            }
            Progress::Blocked(dependency) => {
                log::debug!("Suspended on {:?}", dependency);
                self.state = TransformationState::Paused;
                Ok(Status::Paused)
            }
        }
    }

    /// Steps until the transformation finishes, blocks or needs an output
    /// decision.
    pub fn run(&mut self) -> Result<Status, TransformError> {
        loop {
            match self.step()? {
                Status::Paused => continue,
                other => return Ok(other),
            }
        }
    }

    /// The method detected from the output so far, while a decision is pending.
    pub fn detected_output_method(&self) -> Option<OutputMethod> {
        self.detected
    }

    /// Answers `NeedsOutputDecision` with an explicit method.
    pub fn set_output_method(&mut self, method: OutputMethod) -> Result<(), TransformError> {
        if self.state != TransformationState::NeedsOutputDecision {
            return Err(TransformError::invalid_state(self.state, "set_output_method"));
        }
        if let Err(error) = self.switch_output(method) {
            return Err(self.fail(error));
        }
        self.state = TransformationState::Paused;
        Ok(())
    }

    /// Answers `NeedsOutputDecision` with the detected method.
    pub fn confirm_output_method(&mut self) -> Result<(), TransformError> {
        let method = self.detected.unwrap_or(OutputMethod::Xml);
        self.set_output_method(method)
    }

    /// Completes the load started for `handle`. `None` means it failed.
    pub fn parsing_finished(
        &mut self,
        handle: LoadHandle,
        tree: Option<Box<dyn TreeAccess>>,
    ) -> Result<(), TransformError> {
        let index = self
            .pending_loads
            .iter()
            .position(|(pending, _)| *pending == handle)
            .ok_or_else(|| {
                TransformError::invalid_state(
                    self.state,
                    format!("parsing_finished for unknown handle {}", handle),
                )
            })?;
        let (_, uri) = self.pending_loads.remove(index);
        log::debug!(
            "Load of '{}' {}",
            uri,
            if tree.is_some() { "completed" } else { "failed" }
        );
        self.engine.document_loaded(uri, tree)?;
        if self.pending_loads.is_empty() && self.state == TransformationState::Blocked {
            self.state = TransformationState::Paused;
            if let Some(host) = self.host.as_mut() {
                host.continue_transformation();
            }
        }
        Ok(())
    }

    fn request_document(&mut self, uri: DocumentUri) -> Result<(), TransformError> {
        if self.pending_loads.iter().any(|(_, pending)| *pending == uri) {
            return Ok(());
        }
        match self.loader.as_mut().and_then(|loader| loader.load_document(&uri)) {
            Some(handle) => {
                log::debug!("Loading '{}' as handle {}", uri, handle);
                self.pending_loads.try_reserve(1)?;
                self.pending_loads.push((handle, uri));
                Ok(())
            }
            None => {
                log::debug!("Document '{}' could not be requested", uri);
                self.engine.document_loaded(uri, None)
            }
        }
    }

    fn switch_output(&mut self, method: OutputMethod) -> Result<(), TransformError> {
        let out = self.target.take().ok_or_else(|| {
            TransformError::invalid_state(self.state, "output method already chosen")
        })?;
        let mut spec = self.output.clone();
        spec.method = Some(method);
        let sink = tee(Sink::serializer(method, &spec, out), method, &spec, &self.config);
        log::debug!("Switching output to {}", sink.kind());
        self.engine.replace_output(sink)
    }

    fn forward_messages(&mut self) {
        for diagnostic in self.engine.take_messages() {
            self.report(diagnostic);
        }
    }

    fn report(&mut self, diagnostic: Diagnostic) {
        if let Some(host) = self.host.as_mut()
            && host.handle_message(diagnostic.kind, &diagnostic.text) == MessageDisposition::Unhandled
        {
            log::debug!("Host did not handle {}", diagnostic);
        }
        self.diagnostics.push(diagnostic);
    }

    fn fail(&mut self, error: TransformError) -> TransformError {
        log::error!("Transformation failed: {}", error);
        self.report(Diagnostic::new(MessageKind::Error, error.to_string()));
        self.state = TransformationState::Failed;
        self.cancel_loads();
        error
    }

    fn cancel_loads(&mut self) {
        for (handle, uri) in self.pending_loads.drain(..) {
            log::debug!("Cancelling load of '{}'", uri);
            if let Some(loader) = self.loader.as_mut() {
                loader.cancel_load_document(handle);
            }
        }
    }
}

impl Drop for Transformation {
    fn drop(&mut self) {
        self.cancel_loads();
    }
}

/// Wraps `sink` in a tee when the configuration asks for a file copy.
fn tee(sink: Sink, method: OutputMethod, spec: &OutputSpecification, config: &TransformConfig) -> Sink {
    match &config.tee_path {
        Some(path) => Sink::Tee(Box::new(TeeSink::to_file(sink, method, spec, path))),
        None => sink,
    }
}
