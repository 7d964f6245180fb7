pub mod prompts;
pub mod refine;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::server::config::StageModels;
use crate::server::models::{
    HistoryContent, HistoryEntry, PresentationStrawman, Role, Session, SessionState,
};
use crate::server::registry::Registry;
use crate::server::services::classifier::{Classifier, DiversityWarning};
use crate::server::services::deck_builder::DeckBuilderClient;
use crate::server::services::intent::{Intent, IntentRouter};
use crate::server::services::llm::{CompletionRequest, LlmGateway};
use crate::server::services::retry::{call_with_retry, RetryPolicy};
use crate::server::services::scheduler::{ProgressEvent, ServiceRouter};
use crate::server::services::session_store::SessionStore;
use crate::server::ws::packager;
use crate::server::ws::types::Envelope;

use refine::{apply_operations, extract_json, RefinementPlan, SlideDraft, StrawmanDraft};

/// The per-session dialog state machine. One `Director` serves the whole
/// process; per-session state lives in the `Session` it is handed. Every
/// transition is persisted before its messages are acknowledged to the
/// client.
pub struct Director {
    gateway: Arc<dyn LlmGateway>,
    store: Arc<dyn SessionStore>,
    registry: Arc<Registry>,
    classifier: Classifier,
    router: Arc<ServiceRouter>,
    deck_builder: Option<DeckBuilderClient>,
    intents: IntentRouter,
    models: StageModels,
    retry_policy: RetryPolicy,
    presentations_base_url: String,
}

impl Director {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        store: Arc<dyn SessionStore>,
        registry: Arc<Registry>,
        router: Arc<ServiceRouter>,
        deck_builder: Option<DeckBuilderClient>,
        models: StageModels,
        retry_policy: RetryPolicy,
        presentations_base_url: String,
    ) -> Self {
        let classifier = Classifier::new(registry.clone());
        let intents = IntentRouter::new(gateway.clone(), models.intent.clone());
        Self {
            gateway,
            store,
            registry,
            classifier,
            router,
            deck_builder,
            intents,
            models,
            retry_policy,
            presentations_base_url,
        }
    }

    /// First contact for a brand-new session: emit the greeting and wait for
    /// a topic.
    pub async fn greet(&self, session: &mut Session, tx: mpsc::Sender<Envelope>) -> Result<()> {
        let tx = &tx;
        let greeting = self
            .complete(
                &self.models.greeting,
                prompts::greeting_system(),
                "A user just connected to build a presentation.".to_string(),
                0.7,
            )
            .await?;
        self.emit(
            session,
            tx,
            Role::Assistant,
            HistoryContent::AssistantText { text: greeting },
        )
        .await
    }

    /// One full dialog step: classify the intent, run the state's work,
    /// persist, push the resulting messages.
    pub async fn handle_user_message(
        &self,
        session: &mut Session,
        text: String,
        tx: mpsc::Sender<Envelope>,
        cancel: watch::Receiver<bool>,
    ) -> Result<()> {
        let text = text.as_str();
        let tx = &tx;
        let intent = self.intents.classify(session.current_state, text).await;
        info!(
            session_id = %session.session_id,
            state = ?session.current_state,
            intent = intent.value(),
            "dialog step"
        );

        let entry = session.record(
            Role::User,
            HistoryContent::UserText {
                text: text.to_string(),
            },
        );
        self.persist(session, std::slice::from_ref(&entry)).await;

        match (session.current_state, intent) {
            (SessionState::ProvideGreeting, _) => self.ask_clarifying(session, tx).await,
            (SessionState::AskClarifyingQuestions, _) => self.present_plan(session, tx).await,
            (SessionState::CreateConfirmationPlan, Intent::AcceptPlan) => {
                self.present_strawman(session, tx).await
            }
            (SessionState::CreateConfirmationPlan, _) => {
                self.revisit_questions(session, text, tx).await
            }
            (
                SessionState::GenerateStrawman | SessionState::RefineStrawman,
                Intent::AcceptStrawman,
            ) => self.run_generation(session, tx, cancel).await,
            (
                SessionState::GenerateStrawman | SessionState::RefineStrawman,
                Intent::RequestRefinement,
            ) if text.trim() == Intent::RequestRefinement.value() => {
                // Bare button press; there is nothing to apply yet.
                self.prompt_for_refinement(session, tx).await
            }
            (SessionState::GenerateStrawman | SessionState::RefineStrawman, _) => {
                self.apply_refinement(session, text, tx).await
            }
            (SessionState::ContentGeneration, _) => {
                // Only reachable after a reconnect cut a previous run short;
                // the driver handles inbound messages one at a time, so a
                // live run never sees another message. Pick generation back
                // up rather than stranding the session.
                self.run_generation(session, tx, cancel).await
            }
            (SessionState::Terminal, Intent::Restart) => self.restart(session, tx).await,
            (SessionState::Terminal, _) => {
                self.emit(
                    session,
                    tx,
                    Role::Assistant,
                    HistoryContent::AssistantText {
                        text: "Your deck is ready. Say 'restart' whenever you want to build another."
                            .to_string(),
                    },
                )
                .await
            }
        }
    }

    async fn ask_clarifying(&self, session: &mut Session, tx: &mpsc::Sender<Envelope>) -> Result<()> {
        let questions = self
            .complete(
                &self.models.clarifying,
                prompts::clarifying_system(),
                self.transcript(session),
                0.5,
            )
            .await?;
        session.current_state = SessionState::AskClarifyingQuestions;
        self.emit(
            session,
            tx,
            Role::Assistant,
            HistoryContent::AssistantText { text: questions },
        )
        .await
    }

    async fn present_plan(&self, session: &mut Session, tx: &mpsc::Sender<Envelope>) -> Result<()> {
        let plan = self
            .complete(
                &self.models.planning,
                prompts::plan_system(),
                self.transcript(session),
                0.4,
            )
            .await?;
        session.current_state = SessionState::CreateConfirmationPlan;
        self.emit(
            session,
            tx,
            Role::Assistant,
            HistoryContent::PlanPresented { text: plan },
        )
        .await
    }

    async fn revisit_questions(
        &self,
        session: &mut Session,
        feedback: &str,
        tx: &mpsc::Sender<Envelope>,
    ) -> Result<()> {
        let prompt = format!(
            "{}\n\nThe user declined the plan with: {feedback}\nAsk revised \
             clarifying questions that address their concern.",
            self.transcript(session)
        );
        let questions = self
            .complete(&self.models.clarifying, prompts::clarifying_system(), prompt, 0.5)
            .await?;
        session.current_state = SessionState::AskClarifyingQuestions;
        self.emit(
            session,
            tx,
            Role::Assistant,
            HistoryContent::AssistantText { text: questions },
        )
        .await
    }

    async fn present_strawman(
        &self,
        session: &mut Session,
        tx: &mpsc::Sender<Envelope>,
    ) -> Result<()> {
        let raw = self
            .complete(
                &self.models.strawman,
                prompts::strawman_system(&self.registry),
                self.transcript(session),
                0.4,
            )
            .await?;
        let draft: StrawmanDraft = serde_json::from_str(extract_json(&raw))
            .context("strawman response was not valid JSON")?;
        let mut strawman = draft.into_strawman();

        self.classifier.classify_all(&mut strawman.slides);
        self.ensure_executive_summary(&mut strawman);
        self.classifier
            .validate_layouts(&strawman.slides)
            .context("strawman violated the layout constraint")?;
        self.attach_preview(session, &mut strawman).await;

        session.presentation_strawman = Some(strawman);
        session.current_state = SessionState::GenerateStrawman;
        self.emit(session, tx, Role::Assistant, HistoryContent::StrawmanPresented)
            .await
    }

    async fn prompt_for_refinement(
        &self,
        session: &mut Session,
        tx: &mpsc::Sender<Envelope>,
    ) -> Result<()> {
        session.current_state = SessionState::RefineStrawman;
        self.emit(
            session,
            tx,
            Role::Assistant,
            HistoryContent::AssistantText {
                text: "What would you like to change? You can edit, add or remove \
                       slides, or ask for a different structure on any slide."
                    .to_string(),
            },
        )
        .await
    }

    async fn apply_refinement(
        &self,
        session: &mut Session,
        instruction: &str,
        tx: &mpsc::Sender<Envelope>,
    ) -> Result<()> {
        let strawman = session
            .presentation_strawman
            .clone()
            .context("refinement requested without a strawman")?;

        let prompt = format!(
            "Current outline JSON:\n{}\n\nUser request:\n{}",
            serde_json::to_string_pretty(&strawman)?,
            instruction
        );
        let raw = self
            .complete(&self.models.refinement, prompts::refinement_system(), prompt, 0.3)
            .await?;
        let plan: RefinementPlan = serde_json::from_str(extract_json(&raw))
            .context("refinement response was not valid JSON")?;

        let mut updated = strawman;
        let applied = apply_operations(&mut updated, plan);

        let mut warnings: Vec<DiversityWarning> = Vec::new();
        if applied.structural_change {
            warnings.extend(self.classifier.classify_all(&mut updated.slides));
        }

        // Overrides run before the executive-summary insertion: their
        // indices were resolved against the deck as apply_operations left
        // it, and inserting a slide would shift them.
        let mut notes: Vec<String> = Vec::new();
        for target in &applied.overrides {
            match target.variant_id.as_deref() {
                // Explicit override: assign directly; it stands regardless
                // of diversity findings.
                Some(id) => match self.registry.variant(id) {
                    Some((_, _, variant)) => {
                        let slide = &mut updated.slides[target.index];
                        slide.variant_id = Some(variant.variant_id.clone());
                        slide.slide_type_classification =
                            Some(variant.classification.slide_type.clone());
                        slide.layout_id = Some(variant.classification.layout_id);
                    }
                    None => {
                        let slide_number = updated.slides[target.index].slide_number;
                        warn!(
                            variant = id,
                            slide = slide_number,
                            "override requested an unknown variant"
                        );
                        notes.push(format!(
                            "slide {slide_number}: requested structure '{id}' is not in \
                             the catalog, so one was derived from the slide text instead"
                        ));
                        self.classifier
                            .classify_single(&mut updated.slides, target.index);
                    }
                },
                None => {
                    self.classifier
                        .classify_single(&mut updated.slides, target.index);
                }
            }
        }
        self.ensure_executive_summary(&mut updated);

        // Diversity findings once, over the final deck.
        warnings.extend(self.classifier.diversity_warnings(&updated.slides));

        self.classifier
            .validate_layouts(&updated.slides)
            .context("refinement violated the layout constraint")?;
        self.attach_preview(session, &mut updated).await;

        session.presentation_strawman = Some(updated);
        session.current_state = SessionState::RefineStrawman;

        let mut callouts = notes;
        callouts.extend(
            warnings
                .iter()
                .map(|w| format!("slide {}: {}", w.slide_number, w.detail)),
        );
        if !callouts.is_empty() {
            let text = format!("Heads up: {}", callouts.join("; "));
            self.emit(
                session,
                tx,
                Role::Assistant,
                HistoryContent::AssistantText { text },
            )
            .await?;
        }
        self.emit(session, tx, Role::Assistant, HistoryContent::StrawmanPresented)
            .await
    }

    /// Stage 6: fan out content generation, stream progress, close out the
    /// session with the final URL. Partial failure never aborts.
    async fn run_generation(
        &self,
        session: &mut Session,
        tx: &mpsc::Sender<Envelope>,
        cancel: watch::Receiver<bool>,
    ) -> Result<()> {
        let strawman = session
            .presentation_strawman
            .clone()
            .context("content generation requested without a strawman")?;
        let total = strawman.slides.len();

        session.current_state = SessionState::ContentGeneration;
        self.emit(
            session,
            tx,
            Role::Assistant,
            HistoryContent::GenerationStatus {
                text: format!("Generating content for {total} slides..."),
            },
        )
        .await?;

        let (progress_tx, mut progress_rx) = mpsc::channel::<ProgressEvent>(64);
        let generation = self
            .router
            .generate_all(&strawman, Some(progress_tx), cancel);
        tokio::pin!(generation);

        let report = loop {
            tokio::select! {
                report = &mut generation => break report,
                Some(event) = progress_rx.recv() => {
                    if let ProgressEvent::SlideFinished { slide_number, ok } = event {
                        let text = if ok {
                            format!("Slide {slide_number} of {total} ready.")
                        } else {
                            format!("Slide {slide_number} of {total} failed; continuing.")
                        };
                        self.emit(
                            session,
                            tx,
                            Role::Assistant,
                            HistoryContent::GenerationStatus { text },
                        )
                        .await?;
                    }
                }
            }
        };
        while let Ok(event) = progress_rx.try_recv() {
            if let ProgressEvent::SlideFinished { slide_number, ok } = event {
                let text = if ok {
                    format!("Slide {slide_number} of {total} ready.")
                } else {
                    format!("Slide {slide_number} of {total} failed; continuing.")
                };
                self.emit(
                    session,
                    tx,
                    Role::Assistant,
                    HistoryContent::GenerationStatus { text },
                )
                .await?;
            }
        }

        if !report.failed_slides.is_empty() {
            let actions = report
                .error_summary
                .recommended_actions
                .iter()
                .take(3)
                .cloned()
                .collect::<Vec<_>>()
                .join("; ");
            let text = format!(
                "{} of {} slides could not be generated ({}). Recommended: {}",
                report.failed_slides.len(),
                total,
                report.error_summary.digest(),
                actions
            );
            self.emit(
                session,
                tx,
                Role::Assistant,
                HistoryContent::AssistantText { text },
            )
            .await?;
        }

        let url = match &self.deck_builder {
            Some(builder) => match builder
                .assemble(&session.session_id, &strawman, &report.generated_slides)
                .await
            {
                Ok(assembled) => assembled.url,
                Err(err) => {
                    warn!(error = %err, "deck assembly failed, falling back to direct URL");
                    self.fallback_presentation_url(session)
                }
            },
            None => self.fallback_presentation_url(session),
        };

        session.final_presentation_url = Some(url.clone());
        session.current_state = SessionState::Terminal;
        self.emit(session, tx, Role::Assistant, HistoryContent::FinalUrl { url })
            .await
    }

    async fn restart(&self, session: &mut Session, tx: &mpsc::Sender<Envelope>) -> Result<()> {
        session.presentation_strawman = None;
        session.final_presentation_url = None;
        session.current_state = SessionState::AskClarifyingQuestions;
        self.emit(
            session,
            tx,
            Role::Assistant,
            HistoryContent::AssistantText {
                text: "Happy to start a new deck. What should this one cover?".to_string(),
            },
        )
        .await
    }

    /// Record an entry, persist the session, then send the entry's messages.
    /// Live output and history replay go through the same packager path.
    async fn emit(
        &self,
        session: &mut Session,
        tx: &mpsc::Sender<Envelope>,
        role: Role,
        content: HistoryContent,
    ) -> Result<()> {
        let tx = tx.clone();
        let entry = session.record(role, content);
        self.persist(session, std::slice::from_ref(&entry)).await;
        for message in packager::messages_for_entry(session, &entry) {
            tx.send(message).await.context("client channel closed")?;
        }
        Ok(())
    }

    /// Save and append; store failures degrade to the in-memory session for
    /// the rest of the connection.
    async fn persist(&self, session: &Session, entries: &[HistoryEntry]) {
        if let Err(err) = self.store.save(session).await {
            warn!(session_id = %session.session_id, error = %err, "session save failed");
        }
        for entry in entries {
            if let Err(err) = self.store.append_history(&session.session_id, entry).await {
                warn!(session_id = %session.session_id, error = %err, "history append failed");
            }
        }
    }

    async fn complete(
        &self,
        model: &str,
        system: String,
        prompt: String,
        temperature: f32,
    ) -> Result<String> {
        let request = CompletionRequest {
            model: model.to_string(),
            system,
            prompt,
            temperature,
        };
        let outcome = call_with_retry(
            || self.gateway.complete(request.clone()),
            &self.retry_policy,
            "llm_completion",
        )
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(outcome.value)
    }

    /// Flattened dialog transcript used as prompt context.
    fn transcript(&self, session: &Session) -> String {
        session
            .ordered_history()
            .into_iter()
            .filter_map(|entry| match &entry.content {
                HistoryContent::UserText { text } => Some(format!("User: {text}")),
                HistoryContent::AssistantText { text }
                | HistoryContent::PlanPresented { text } => Some(format!("Assistant: {text}")),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Executive, board and investor audiences lead with an executive-
    /// summary grid on slide 2; insert one when classification left it out.
    fn ensure_executive_summary(&self, strawman: &mut PresentationStrawman) {
        if !strawman.has_executive_audience() || strawman.slides.is_empty() {
            return;
        }
        let Some((_, grid)) = self
            .registry
            .variants_by_priority()
            .into_iter()
            .find(|(_, v)| v.classification.slide_type == "summary_grid")
        else {
            return;
        };
        let already = strawman
            .slides
            .get(1)
            .map(|s| s.variant_id.as_deref() == Some(grid.variant_id.as_str()))
            .unwrap_or(false);
        if already {
            return;
        }
        let summary = SlideDraft {
            title: "Executive Summary".to_string(),
            narrative: "At-a-glance highlights for senior stakeholders.".to_string(),
            key_points: vec![
                "Key outcomes".to_string(),
                "Decisions needed".to_string(),
                "Timeline".to_string(),
            ],
            structure_preference: "executive snapshot of kpis and takeaways".to_string(),
            analytics_needed: None,
            visuals_needed: None,
            diagrams_needed: None,
            tables_needed: None,
        };
        // Assign the grid directly; re-classifying the whole deck here
        // would overwrite explicit variant overrides applied just before.
        let mut slide = summary.into_slide(0);
        slide.variant_id = Some(grid.variant_id.clone());
        slide.slide_type_classification = Some(grid.classification.slide_type.clone());
        slide.layout_id = Some(grid.classification.layout_id);
        strawman.slides.insert(1, slide);
        strawman.renumber_slides();
    }

    /// Request a preview render when the builder is enabled. Never fatal.
    async fn attach_preview(&self, session: &Session, strawman: &mut PresentationStrawman) {
        let Some(builder) = &self.deck_builder else {
            return;
        };
        match builder.build_preview(&session.session_id, strawman).await {
            Ok(preview) => {
                strawman.preview_url = Some(preview.preview_url);
                strawman.preview_id = Some(preview.preview_id);
            }
            Err(err) => {
                warn!(session_id = %session.session_id, error = %err, "preview build failed");
            }
        }
    }

    fn fallback_presentation_url(&self, session: &Session) -> String {
        format!(
            "{}/{}",
            self.presentations_base_url.trim_end_matches('/'),
            session.session_id
        )
    }
}
