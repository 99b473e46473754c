use crate::auth::AuthSessionManager;
use crate::error::{ErrorKind, PipelineError};
use crate::extract::ExerciseExtractor;
use crate::gate::RunTicket;
use crate::identity::IdentityProvider;
use crate::model::WorkoutProgram;
use crate::picker::{DocumentPicker, PickOutcome};
use crate::sheets::{GridFetcher, SheetsApi};
use crate::store::SessionStore;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// Commands accepted from the presentation boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SignIn,
    SignOut,
    /// Run the pipeline, letting the user pick the spreadsheet
    Pick,
    /// Run the pipeline on a known spreadsheet, skipping the picker
    Load { document_id: String },
}

/// The single result of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success(WorkoutProgram),
    /// The user dismissed the picker; not an error
    Cancelled,
    Failure { kind: ErrorKind, message: String },
}

impl Outcome {
    pub fn failure(error: &PipelineError) -> Self {
        Outcome::Failure {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl From<PipelineError> for Outcome {
    fn from(error: PipelineError) -> Self {
        Outcome::failure(&error)
    }
}

// Why a run stopped before producing a program.
enum Halt {
    Cancelled,
    Superseded,
    Failed(PipelineError),
}

impl From<PipelineError> for Halt {
    fn from(error: PipelineError) -> Self {
        Halt::Failed(error)
    }
}

enum Target {
    Pick,
    Document(String),
}

/// Orchestrates sign-in, picking, fetching and extraction
///
/// At most one run is live: starting a run supersedes any earlier one, and
/// a superseded run never produces an outcome.
pub struct PipelineController<S, I, P, A> {
    auth: AuthSessionManager<S, I>,
    picker: P,
    fetcher: GridFetcher<A>,
    extractor: ExerciseExtractor,
    sink: Option<UnboundedSender<Outcome>>,
}

impl<S, I, P, A> PipelineController<S, I, P, A>
where
    S: SessionStore,
    I: IdentityProvider,
    P: DocumentPicker,
    A: SheetsApi,
{
    pub fn new(
        auth: AuthSessionManager<S, I>,
        picker: P,
        fetcher: GridFetcher<A>,
        extractor: ExerciseExtractor,
    ) -> Self {
        PipelineController {
            auth,
            picker,
            fetcher,
            extractor,
            sink: None,
        }
    }

    /// Also deliver every outcome to `sink`
    pub fn with_sink(mut self, sink: UnboundedSender<Outcome>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn auth(&self) -> &AuthSessionManager<S, I> {
        &self.auth
    }

    /// Dispatch one command
    ///
    /// # Returns
    /// * `Option<Outcome>` - The run outcome for `Pick`/`Load` (`None` if the
    ///   run was superseded), a `Failure` if `SignIn` fails, otherwise `None`
    pub async fn handle(&self, command: Command) -> Option<Outcome> {
        match command {
            Command::SignIn => match self.auth.sign_in().await {
                Ok(_) => None,
                Err(e) => self.emit(Outcome::failure(&e)),
            },
            Command::SignOut => {
                self.sign_out().await;
                None
            }
            Command::Pick => self.run().await,
            Command::Load { document_id } => self.load(document_id).await,
        }
    }

    /// Run the pipeline with the picker
    pub async fn run(&self) -> Option<Outcome> {
        self.execute(Target::Pick).await
    }

    /// Run the pipeline on a known document id
    pub async fn load(&self, document_id: impl Into<String>) -> Option<Outcome> {
        self.execute(Target::Document(document_id.into())).await
    }

    /// Sign out, cancelling any in-flight run, then revoke the old token
    ///
    /// Revocation is best effort: a failure is logged and the session stays
    /// signed out.
    pub async fn sign_out(&self) {
        match self.auth.sign_out() {
            Ok(Some(token)) => {
                if let Err(e) = self.auth.identity().sign_out(&token).await {
                    warn!("could not revoke token: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("signed out, but the stored session could not be cleared: {}", e),
        }
    }

    async fn execute(&self, target: Target) -> Option<Outcome> {
        let mut ticket = self.auth.begin_run();
        debug!("run {} started", ticket.epoch());

        let result = self.drive(&mut ticket, target).await;
        if !ticket.is_current() {
            info!("run {} superseded; dropping its result", ticket.epoch());
            return None;
        }

        let outcome = match result {
            Ok(program) => Outcome::Success(program),
            Err(Halt::Cancelled) => Outcome::Cancelled,
            Err(Halt::Failed(e)) => {
                warn!("run {} failed: {}", ticket.epoch(), e);
                Outcome::failure(&e)
            }
            Err(Halt::Superseded) => return None,
        };
        self.emit(outcome)
    }

    async fn drive(
        &self,
        ticket: &mut RunTicket,
        target: Target,
    ) -> Result<WorkoutProgram, Halt> {
        let token = match self.auth.current_token() {
            Ok(token) => token,
            Err(_) => self.auth.sign_in_for(ticket).await?,
        };

        let document = match target {
            Target::Pick => match ticket.guard(self.picker.pick(&token)).await {
                None => return Err(Halt::Superseded),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(PickOutcome::Cancelled)) => {
                    info!("picker dismissed");
                    return Err(Halt::Cancelled);
                }
                Some(Ok(PickOutcome::Picked(document))) => document,
            },
            Target::Document(id) => ticket
                .guard(self.fetcher.describe(&id, &token))
                .await
                .ok_or(Halt::Superseded)??,
        };
        debug!("document {} ({:?}) selected", document.id, document.title);

        let sheets = ticket
            .guard(self.fetcher.fetch(&document, &token))
            .await
            .ok_or(Halt::Superseded)??;

        Ok(self.extractor.extract(&document.title, &sheets)?)
    }

    fn emit(&self, outcome: Outcome) -> Option<Outcome> {
        if let Some(sink) = &self.sink {
            if sink.send(outcome.clone()).is_err() {
                debug!("outcome sink closed");
            }
        }
        Some(outcome)
    }
}
