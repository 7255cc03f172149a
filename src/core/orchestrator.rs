//! Orchestration State Machine：主控循环
//!
//! 每次迭代：检查取消与预算 → 调用当前状态的角色（一个 Turn）→ Classifier → Confidence →
//! Repetition → Knowledge Trigger → Router → 输出 TurnEvent → 状态转移 → 上下文压缩。
//! 每个 Attempt 拥有独立的 `AttemptContext`，多个 Attempt 之间没有共享的可变状态。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, CompressionConfig, ControllerConfig, KnowledgeConfig, RepetitionConfig};
use crate::core::router::{Router, RouterSignals, RouterThresholds};
use crate::core::state::{
    Attempt, ControllerState, StrategySwitch, TerminalReason, TerminationReport, Transition,
};
use crate::core::{call_with_retry, ControllerError, RetryPolicy};
use crate::knowledge::{KnowledgeSearch, KnowledgeTrigger, NoopKnowledge};
use crate::memory::{ContextCompressor, FindingExtractor, FindingStore, Transcript, Turn, TurnOutput};
use crate::observability::{NoopSink, TurnEvent, TurnSink};
use crate::roles::{ReviewStatus, Role, RoleOutput, RoleRequest, RoleSet};
use crate::sandbox::{Action, Observation, SandboxExecutor};
use crate::signals::{
    normalize_action, ClassifyInput, ConfidenceTracker, FailureHistory, Outcome, OutcomeClassifier,
    ProofArtifact, ProofVerifier, RepetitionDetector,
};

/// 单个 Attempt 的全部可变状态（单写者：控制器自身）
struct AttemptContext {
    attempt: Attempt,
    started: Instant,
    deadline: Instant,
    transcript: Transcript,
    findings: FindingStore,
    confidence: ConfidenceTracker,
    history: FailureHistory,
    repetition: RepetitionDetector,
    trigger: KnowledgeTrigger,
    /// 待合并进下一次 Advisor 请求的检索段
    pending_knowledge: Option<String>,
    /// Advisor 轮次（假设编号）
    hypothesis: u32,
    current_advice: Option<String>,
    directive: Option<String>,
    switches: Vec<StrategySwitch>,
    /// RETRY_SAME 时重放的 Action
    replay: Option<Action>,
    last_action: Option<Action>,
    reviewed_since_act: bool,
    acts_since_review: usize,
    proof: Option<ProofArtifact>,
}

/// 一个 Turn 的结果（已写入 Transcript）
struct TurnResult {
    index: usize,
    role: Role,
    outcome: Option<Outcome>,
    repetition: Option<String>,
    verdict: Option<ReviewStatus>,
    executed: Option<Action>,
    duration_ms: u64,
}

pub struct Controller {
    config: ControllerConfig,
    roles: RoleSet,
    executor: SandboxExecutor,
    knowledge: Arc<dyn KnowledgeSearch>,
    knowledge_config: KnowledgeConfig,
    sink: Arc<dyn TurnSink>,
    classifier: OutcomeClassifier,
    extractor: Arc<FindingExtractor>,
    compressor: ContextCompressor,
    repetition_config: RepetitionConfig,
    max_observation_chars: usize,
    router: Router,
}

impl Controller {
    pub fn builder(roles: RoleSet, executor: SandboxExecutor) -> ControllerBuilder {
        ControllerBuilder::new(roles, executor)
    }

    /// 按应用配置组装；证明格式同时作为关键发现规则
    pub fn from_config(
        cfg: &AppConfig,
        roles: RoleSet,
        executor: SandboxExecutor,
        knowledge: Arc<dyn KnowledgeSearch>,
        sink: Arc<dyn TurnSink>,
    ) -> Result<Self, ControllerError> {
        cfg.validate()?;
        let proof = ProofVerifier::from_config(&cfg.proof)?;
        let mut extractor = FindingExtractor::builtin().with_proof_pattern(&cfg.proof.pattern);
        if let Some(path) = &cfg.compression.rules_file {
            extractor = extractor.with_rules_file(path)?;
        }
        Controller::builder(roles, executor)
            .with_controller_config(cfg.controller.clone())
            .with_compression_config(cfg.compression.clone())
            .with_repetition_config(cfg.repetition.clone())
            .with_knowledge(knowledge, cfg.knowledge.clone())
            .with_sink(sink)
            .with_proof(proof)
            .with_extractor(extractor)
            .build()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.config.call_retries,
            self.config.retry_backoff(),
            self.config.call_timeout(),
        )
    }

    fn new_context(&self, attempt: Attempt) -> AttemptContext {
        let started = Instant::now();
        AttemptContext {
            deadline: started + attempt.wall_clock,
            started,
            attempt,
            transcript: Transcript::new(),
            findings: FindingStore::new(),
            confidence: ConfidenceTracker::new(self.config.baseline_confidence),
            history: FailureHistory::default(),
            repetition: RepetitionDetector::new(
                self.repetition_config.window,
                self.repetition_config.threshold,
                self.repetition_config.similarity,
            ),
            trigger: KnowledgeTrigger::new(
                self.knowledge_config.failure_threshold,
                self.knowledge_config.top_k,
            ),
            pending_knowledge: None,
            hypothesis: 0,
            current_advice: None,
            directive: None,
            switches: Vec::new(),
            replay: None,
            last_action: None,
            // 尚无 Attacker 回合，没有可评审的内容
            reviewed_since_act: true,
            acts_since_review: 0,
            proof: None,
        }
    }

    /// 运行一个 Attempt 直到终止；总是返回一份终止报告
    pub async fn run(&self, attempt: Attempt, cancel: CancellationToken) -> TerminationReport {
        let mut ctx = self.new_context(attempt);
        let mut state = ControllerState::Advise;
        tracing::info!(
            attempt = %ctx.attempt.id,
            objective = %ctx.attempt.objective,
            target = %ctx.attempt.target,
            max_turns = ctx.attempt.max_turns,
            wall_clock_secs = ctx.attempt.wall_clock.as_secs(),
            "Attempt started"
        );

        let (reason, detail) = loop {
            if cancel.is_cancelled() {
                break (TerminalReason::Unrecoverable, "cancelled".to_string());
            }
            if ctx.transcript.len() >= ctx.attempt.max_turns {
                break (
                    TerminalReason::BudgetExhausted,
                    ControllerError::BudgetExceeded(format!("{} turns used", ctx.transcript.len()))
                        .to_string(),
                );
            }
            if Instant::now() >= ctx.deadline {
                break (
                    TerminalReason::BudgetExhausted,
                    ControllerError::BudgetExceeded("wall clock exhausted".into()).to_string(),
                );
            }
            let role = match state {
                ControllerState::Advise => Role::Advisor,
                ControllerState::Act => Role::Attacker,
                ControllerState::Review => Role::Reviewer,
                ControllerState::Terminated(reason) => break (reason, String::new()),
            };

            let result = match self.run_turn(&mut ctx, role, &cancel).await {
                Ok(result) => result,
                Err(ControllerError::Cancelled) => {
                    break (TerminalReason::Unrecoverable, "cancelled".to_string())
                }
                Err(e) => match e.terminal_reason() {
                    Some(reason) => break (reason, e.to_string()),
                    None => {
                        tracing::error!(error = %e, "Non-terminal error escaped the turn");
                        break (TerminalReason::Unrecoverable, e.to_string());
                    }
                },
            };

            if let Err(ControllerError::Cancelled) = self.maybe_search(&mut ctx, &cancel).await {
                break (TerminalReason::Unrecoverable, "cancelled".to_string());
            }

            let signals = self.signals(&ctx, &result);
            let decision = self.router.decide(&signals);
            let update_score = ctx.confidence.score();
            self.sink.record(&TurnEvent {
                attempt_id: ctx.attempt.id.to_string(),
                turn: result.index,
                role: result.role,
                transition: decision.transition,
                rule: decision.rule,
                confidence: update_score,
                consecutive_failures: ctx.confidence.consecutive_failures(),
                failure: result.outcome.as_ref().and_then(|o| o.failure()).cloned(),
                duration_ms: result.duration_ms,
            });
            tracing::info!(
                attempt = %ctx.attempt.id,
                turn = result.index,
                role = %result.role,
                outcome = %result.outcome.as_ref().map(|o| o.label()).unwrap_or_else(|| "-".into()),
                transition = %decision.transition,
                rule = decision.rule,
                confidence = update_score,
                "Turn complete"
            );

            state = self.next_state(&mut ctx, state, decision.transition, &result);

            if let ControllerState::Terminated(reason) = state {
                let detail = match reason {
                    TerminalReason::Success => "verified proof artifact".to_string(),
                    TerminalReason::BudgetExhausted => ControllerError::BudgetExceeded(format!(
                        "{} of {} turns, {}ms elapsed",
                        ctx.transcript.len(),
                        ctx.attempt.max_turns,
                        ctx.started.elapsed().as_millis()
                    ))
                    .to_string(),
                    TerminalReason::Unrecoverable => ControllerError::UnrecoverableTarget(
                        result
                            .outcome
                            .as_ref()
                            .and_then(|o| o.failure())
                            .map(|f| f.rationale.clone())
                            .unwrap_or_default(),
                    )
                    .to_string(),
                };
                break (reason, detail);
            }

            self.compressor
                .compress(&mut ctx.transcript, &mut ctx.findings, &self.extractor);
        };

        self.report(ctx, reason, detail)
    }

    fn report(&self, ctx: AttemptContext, reason: TerminalReason, detail: String) -> TerminationReport {
        let report = TerminationReport {
            attempt_id: ctx.attempt.id.to_string(),
            objective: ctx.attempt.objective,
            target: ctx.attempt.target,
            success: reason == TerminalReason::Success,
            proof: ctx.proof,
            total_turns: ctx.transcript.len(),
            wall_clock_ms: ctx.started.elapsed().as_millis() as u64,
            reason,
            detail,
            final_confidence: ctx.confidence.score(),
            findings: ctx.findings.all().to_vec(),
            switches: ctx.switches,
            segments: ctx.transcript.segments().len(),
        };
        tracing::info!(
            attempt = %report.attempt_id,
            reason = %report.reason,
            turns = report.total_turns,
            wall_clock_ms = report.wall_clock_ms,
            findings = report.findings.len(),
            "Attempt terminated: {}",
            report.detail
        );
        report
    }

    fn build_request(&self, ctx: &AttemptContext, role: Role) -> RoleRequest {
        let mut context = String::new();
        if role == Role::Advisor && !ctx.switches.is_empty() {
            context.push_str("## Strategy switches\n");
            for s in &ctx.switches {
                context.push_str(&format!(
                    "- turn {}: {} away from `{}` ({})\n",
                    s.turn, s.transition, s.from, s.reason
                ));
            }
            context.push('\n');
        }
        context.push_str(&self.compressor.render_context(&ctx.transcript, &ctx.findings));

        let directive = match role {
            Role::Advisor => ctx.directive.clone(),
            Role::Attacker => ctx
                .current_advice
                .as_ref()
                .map(|a| format!("Execute the current hypothesis (#{}): {}", ctx.hypothesis, a)),
            Role::Reviewer => ctx
                .last_action
                .as_ref()
                .map(|a| format!("Audit the latest attacker action: {}", a.preview(200))),
        };

        RoleRequest {
            role,
            objective: ctx.attempt.objective.clone(),
            target: ctx.attempt.target.clone(),
            context,
            directive,
            knowledge: if role == Role::Advisor {
                ctx.pending_knowledge.clone()
            } else {
                None
            },
        }
    }

    async fn call_role(
        &self,
        ctx: &AttemptContext,
        role: Role,
        cancel: &CancellationToken,
    ) -> Result<RoleOutput, ControllerError> {
        let request = self.build_request(ctx, role);
        let agent = self.roles.get(role).clone();
        call_with_retry(&self.retry_policy(), role.as_str(), ctx.deadline, cancel, || {
            let agent = agent.clone();
            let request = request.clone();
            async move { agent.invoke(&request).await }
        })
        .await
    }

    /// 调用角色并记录 Turn；Err 只有取消与预算耗尽
    async fn run_turn(
        &self,
        ctx: &mut AttemptContext,
        role: Role,
        cancel: &CancellationToken,
    ) -> Result<TurnResult, ControllerError> {
        let started_at = Utc::now();
        let start = Instant::now();
        let revision = ctx.transcript.revision();

        // RETRY_SAME 重放：不再调用 Attacker
        let replay = if role == Role::Attacker {
            ctx.replay.take()
        } else {
            None
        };
        let replayed = replay.is_some();
        let output = match replay {
            Some(action) => Ok(RoleOutput::Action(action)),
            None => self.call_role(ctx, role, cancel).await,
        };

        let mut result = TurnResult {
            index: ctx.transcript.next_index(),
            role,
            outcome: None,
            repetition: None,
            verdict: None,
            executed: None,
            duration_ms: 0,
        };

        let turn_output = match output {
            Err(e) if e.is_terminal() => return Err(e),
            Err(e) => {
                tracing::warn!(role = %role, error = %e, "Role call failed");
                if let ControllerError::MalformedResponse { raw, .. } = &e {
                    tracing::debug!(role = %role, raw = %raw, "Malformed role response");
                }
                let outcome = self
                    .classifier
                    .classify_call_failure(role.as_str(), &e, ctx.hypothesis);
                result.outcome = Some(outcome);
                TurnOutput::CallFailed {
                    error: e.to_string(),
                }
            }
            Ok(RoleOutput::Advice(text)) => {
                ctx.hypothesis += 1;
                ctx.current_advice = Some(text.clone());
                ctx.directive = None;
                ctx.pending_knowledge = None;
                TurnOutput::Advice { text }
            }
            Ok(RoleOutput::Review(verdict)) => {
                ctx.reviewed_since_act = true;
                ctx.acts_since_review = 0;
                result.verdict = Some(verdict.status);
                TurnOutput::Review { verdict }
            }
            Ok(RoleOutput::Action(action)) => {
                let observation = match self.execute(ctx, &action, &mut result, cancel).await {
                    Ok(obs) => obs,
                    Err((obs, e)) => {
                        // 终止前仍为该 Action 记录一个 Observation
                        let output = TurnOutput::Action {
                            action,
                            observation: obs,
                            replayed,
                        };
                        self.push_turn(ctx, role, output, None, revision, started_at, start);
                        return Err(e);
                    }
                };
                ctx.reviewed_since_act = false;
                ctx.acts_since_review += 1;
                ctx.last_action = Some(action.clone());
                result.executed = Some(action.clone());
                TurnOutput::Action {
                    action,
                    observation,
                    replayed,
                }
            }
        };

        if let Some(outcome) = &result.outcome {
            let update = ctx.confidence.apply(outcome);
            ctx.history.record(outcome);
            if let Some(failure) = outcome.failure() {
                tracing::warn!(
                    tier = failure.tier.level(),
                    category = failure.category.as_str(),
                    confidence = update.after,
                    consecutive_failures = update.consecutive_failures,
                    "{}",
                    failure.rationale
                );
            }
            if let Some(proof) = outcome.proof() {
                ctx.proof = Some(proof.clone());
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        let outcome = result.outcome.clone();
        self.push_turn(ctx, role, turn_output, outcome, revision, started_at, start);
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn push_turn(
        &self,
        ctx: &mut AttemptContext,
        role: Role,
        output: TurnOutput,
        outcome: Option<Outcome>,
        context_revision: usize,
        started_at: chrono::DateTime<Utc>,
        start: Instant,
    ) {
        ctx.transcript.push(Turn {
            index: 0,
            role,
            output,
            outcome,
            context_revision,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
        });
    }

    /// 执行 Action 并分类；取消 / 预算耗尽时返回占位 Observation 与错误
    async fn execute(
        &self,
        ctx: &mut AttemptContext,
        action: &Action,
        result: &mut TurnResult,
        cancel: &CancellationToken,
    ) -> Result<Observation, (Observation, ControllerError)> {
        let start = Instant::now();
        let (observation, full_output) = match self.executor.run(action, ctx.deadline, cancel).await {
            Ok(raw) => (
                Observation::from_raw(&raw, self.max_observation_chars),
                raw.combined(),
            ),
            Err(e) if e.is_terminal() => {
                let ms = start.elapsed().as_millis() as u64;
                return Err((Observation::sandbox_failed(e.to_string(), ms), e));
            }
            Err(e) => {
                let ms = start.elapsed().as_millis() as u64;
                let obs = if e.is_timeout() {
                    Observation::timed_out(e.to_string(), ms)
                } else {
                    Observation::sandbox_failed(e.to_string(), ms)
                };
                (obs, String::new())
            }
        };

        // 关键发现在截断之前按完整输出提取
        if !full_output.is_empty() {
            ctx.findings.ingest(
                &self.extractor,
                result.index,
                &observation.fingerprint,
                &full_output,
            );
        }

        let normalized = normalize_action(action);
        let key = normalized.key();
        let previous = ctx
            .repetition
            .last_fingerprint_for(&normalized)
            .map(String::from);
        let outcome = self.classifier.classify(
            &ClassifyInput {
                action_key: &key,
                hypothesis: ctx.hypothesis,
                turn: result.index,
                observation: &observation,
                full_output: &full_output,
                previous_fingerprint: previous.as_deref(),
            },
            &ctx.history,
        );

        let signal = ctx.repetition.observe(&normalized, &observation);
        if let Some(reason) = &signal.reason {
            tracing::warn!(
                error = %ControllerError::RepetitionLoopDetected(reason.clone()),
                action = %action.preview(120),
                "Repetition flagged"
            );
        }
        result.repetition = signal.reason;
        result.outcome = Some(outcome);
        Ok(observation)
    }

    /// 连续失败越过阈值时检索一次，结果留给下一次 Advisor 请求
    async fn maybe_search(
        &self,
        ctx: &mut AttemptContext,
        cancel: &CancellationToken,
    ) -> Result<(), ControllerError> {
        if !ctx.trigger.observe(ctx.confidence.consecutive_failures()) {
            return Ok(());
        }
        if !self.knowledge.enabled() {
            tracing::debug!("Knowledge trigger fired but no search backend is configured");
            return Ok(());
        }
        let query = KnowledgeTrigger::build_query(
            &ctx.attempt.objective,
            &ctx.history.recent_categories(3),
        );
        let k = ctx.trigger.top_k();
        let knowledge = self.knowledge.clone();
        let policy = RetryPolicy::new(
            self.config.call_retries,
            self.config.retry_backoff(),
            self.config
                .call_timeout()
                .min(Duration::from_secs(self.knowledge_config.timeout_secs.max(1))),
        );
        let found = call_with_retry(&policy, "knowledge", ctx.deadline, cancel, || {
            let knowledge = knowledge.clone();
            let query = query.clone();
            async move { knowledge.search(&query, k).await }
        })
        .await;

        match found {
            Ok(snippets) => {
                tracing::info!(query = %query, results = snippets.len(), "Knowledge search fired");
                ctx.pending_knowledge = KnowledgeTrigger::render_section(&snippets);
                Ok(())
            }
            Err(ControllerError::Cancelled) => Err(ControllerError::Cancelled),
            Err(e) => {
                tracing::warn!(query = %query, error = %e, "Knowledge search failed");
                Ok(())
            }
        }
    }

    fn signals(&self, ctx: &AttemptContext, result: &TurnResult) -> RouterSignals {
        let turns_used = ctx.transcript.len();
        RouterSignals {
            confidence: ctx.confidence.score(),
            consecutive_failures: ctx.confidence.consecutive_failures(),
            latest_tier: result.outcome.as_ref().and_then(|o| o.tier()),
            proof_verified: result.outcome.as_ref().and_then(|o| o.proof()).is_some(),
            repetition: result.repetition.is_some(),
            same_action_streak: ctx.history.same_action_streak(),
            same_category_streak: ctx.history.same_category_streak(),
            transient_streak: ctx.history.transient_streak(),
            turns_used,
            turns_remaining: ctx.attempt.max_turns.saturating_sub(turns_used),
            elapsed: ctx.started.elapsed(),
            wall_clock: ctx.attempt.wall_clock,
        }
    }

    /// 把 Router 的转移应用到当前状态
    fn next_state(
        &self,
        ctx: &mut AttemptContext,
        state: ControllerState,
        transition: Transition,
        result: &TurnResult,
    ) -> ControllerState {
        if let Some(reason) = transition.terminal_reason() {
            return ControllerState::Terminated(reason);
        }
        if transition.is_switch() {
            self.apply_switch(ctx, transition, result);
            return ControllerState::Advise;
        }

        match state {
            ControllerState::Advise => match transition {
                Transition::RetrySame => ControllerState::Advise,
                Transition::EscalateReview if !ctx.reviewed_since_act => ControllerState::Review,
                _ => ControllerState::Act,
            },
            ControllerState::Act => match transition {
                Transition::RetrySame => {
                    // 沙箱层失败重放同一 Action；Attacker 调用失败则重新调用
                    ctx.replay = result.executed.clone();
                    ControllerState::Act
                }
                Transition::EscalateReview => ControllerState::Review,
                _ => {
                    let interval = self.config.review_interval;
                    if interval > 0 && ctx.acts_since_review >= interval {
                        ControllerState::Review
                    } else {
                        ControllerState::Advise
                    }
                }
            },
            ControllerState::Review => match transition {
                Transition::RetrySame => ControllerState::Review,
                _ => match result.verdict {
                    Some(ReviewStatus::Partial) => ControllerState::Act,
                    Some(ReviewStatus::Verified) => {
                        tracing::info!("Reviewer reported VERIFIED without a verified proof artifact; continuing as PARTIAL");
                        ControllerState::Act
                    }
                    Some(ReviewStatus::Failed) | None => ControllerState::Advise,
                },
            },
            ControllerState::Terminated(reason) => ControllerState::Terminated(reason),
        }
    }

    fn apply_switch(&self, ctx: &mut AttemptContext, transition: Transition, result: &TurnResult) {
        let last = ctx.history.last_failure().cloned();
        let (from, reason) = match transition {
            Transition::SwitchMethod => (
                ctx.last_action
                    .as_ref()
                    .map(|a| a.preview(80))
                    .unwrap_or_else(|| "current method".into()),
                result.repetition.clone().unwrap_or_else(|| {
                    format!(
                        "same action failed {} consecutive times",
                        ctx.history.same_action_streak()
                    )
                }),
            ),
            _ => (
                last.as_ref()
                    .map(|f| f.category.as_str().to_string())
                    .unwrap_or_else(|| "current category".into()),
                format!(
                    "{} consecutive failures in the same category",
                    ctx.history.same_category_streak()
                ),
            ),
        };

        ctx.directive = Some(match transition {
            Transition::SwitchMethod => format!(
                "SWITCH METHOD: `{}` is not working ({}). Propose a different technique; do not repeat it.",
                from, reason
            ),
            _ => format!(
                "SWITCH CATEGORY: `{}` failures persist ({}). Propose a different class of attack.",
                from, reason
            ),
        });
        tracing::info!(transition = %transition, from = %from, reason = %reason, "Strategy switch");
        ctx.switches.push(StrategySwitch {
            turn: result.index,
            transition,
            from,
            reason,
        });
        ctx.history.mark_switch();
        ctx.repetition.clear();
        ctx.replay = None;
    }
}

/// Controller 构建器
pub struct ControllerBuilder {
    roles: RoleSet,
    executor: SandboxExecutor,
    config: ControllerConfig,
    compression: CompressionConfig,
    repetition: RepetitionConfig,
    knowledge: Arc<dyn KnowledgeSearch>,
    knowledge_config: KnowledgeConfig,
    sink: Arc<dyn TurnSink>,
    proof: Option<ProofVerifier>,
    extractor: Option<FindingExtractor>,
}

impl ControllerBuilder {
    pub fn new(roles: RoleSet, executor: SandboxExecutor) -> Self {
        Self {
            roles,
            executor,
            config: ControllerConfig::default(),
            compression: CompressionConfig::default(),
            repetition: RepetitionConfig::default(),
            knowledge: Arc::new(NoopKnowledge),
            knowledge_config: KnowledgeConfig::default(),
            sink: Arc::new(NoopSink),
            proof: None,
            extractor: None,
        }
    }

    pub fn with_controller_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_compression_config(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_repetition_config(mut self, repetition: RepetitionConfig) -> Self {
        self.repetition = repetition;
        self
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeSearch>, config: KnowledgeConfig) -> Self {
        self.knowledge = knowledge;
        self.knowledge_config = config;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TurnSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_proof(mut self, proof: ProofVerifier) -> Self {
        self.proof = Some(proof);
        self
    }

    pub fn with_extractor(mut self, extractor: FindingExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn build(self) -> Result<Controller, ControllerError> {
        self.config.validate()?;
        if self.repetition.window == 0 || self.repetition.threshold == 0 {
            return Err(ControllerError::Config(
                "repetition.window and repetition.threshold must be > 0".into(),
            ));
        }
        let proof = match self.proof {
            Some(p) => p,
            None => ProofVerifier::from_config(&Default::default())?,
        };
        let extractor = self
            .extractor
            .unwrap_or_else(|| FindingExtractor::builtin().with_proof_pattern(proof.pattern()));
        let classifier = OutcomeClassifier::new(
            proof,
            self.config.strategic_repeat_threshold,
            self.config.unreachable_threshold,
        );
        Ok(Controller {
            router: Router::new(RouterThresholds::from_config(&self.config)),
            classifier,
            compressor: ContextCompressor::from_config(&self.compression),
            max_observation_chars: self.compression.max_observation_chars,
            extractor: Arc::new(extractor),
            config: self.config,
            roles: self.roles,
            executor: self.executor,
            knowledge: self.knowledge,
            knowledge_config: self.knowledge_config,
            sink: self.sink,
            repetition_config: self.repetition,
        })
    }
}
