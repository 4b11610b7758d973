//! Event dispatcher: classifies each inbound event, drives the workflows and
//! answers through a [`Notifier`].
//!
//! Every event runs inside an `event` span carrying the sender and the event
//! kind. Ledger changes commit before any message goes out; a failed delivery
//! is logged and otherwise ignored.

use std::sync::Arc;

use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::AppConfig;
use crate::conversation::{ConversationMode, ConversationTracker, Draft};
use crate::credentials;
use crate::error::{Currency, LedgerError, ValidationError};
use crate::event::{Action, DecisionTarget, InboundEvent, MenuItem};
use crate::ledger::{
    InMemory, LedgerStore, NewWithdraw, PendingItem, Persistence, Task, TaskId, TaskKind,
    TaskPayload, UserId, WithdrawId, WithdrawMethod, WithdrawRequest,
};
use crate::notify::{ConsoleNotifier, Control, Notifier, Outbound};
use crate::workflow::{self, AdminPolicy, Decision, SingleAdmin, TaskWorkflow, WithdrawWorkflow};

const OWN_GMAIL_FORMAT: &str = "email password";
const FACEBOOK_FORMAT: &str = "facebook_id email password 2fa_code";

pub struct Dispatcher<P: Persistence = InMemory, N: Notifier = ConsoleNotifier> {
    config: AppConfig,
    store: Arc<LedgerStore<P>>,
    conversations: ConversationTracker,
    tasks: TaskWorkflow<P>,
    withdraws: WithdrawWorkflow<P>,
    admins: Arc<dyn AdminPolicy>,
    notifier: N,
}

impl<P: Persistence, N: Notifier> Dispatcher<P, N> {
    /// Dispatcher whose only admin is `config.admin_id`.
    pub fn new(config: AppConfig, store: Arc<LedgerStore<P>>, notifier: N) -> Self {
        let admins: Arc<dyn AdminPolicy> = Arc::new(SingleAdmin(config.admin_id));
        Self::with_policy(config, store, notifier, admins)
    }

    pub fn with_policy(
        config: AppConfig,
        store: Arc<LedgerStore<P>>,
        notifier: N,
        admins: Arc<dyn AdminPolicy>,
    ) -> Self {
        let tasks = TaskWorkflow::new(
            Arc::clone(&store),
            config.rewards.clone(),
            Arc::clone(&admins),
        );
        let withdraws = WithdrawWorkflow::new(
            Arc::clone(&store),
            config.withdraw.clone(),
            Arc::clone(&admins),
        );
        Self {
            config,
            store,
            conversations: ConversationTracker::new(),
            tasks,
            withdraws,
            admins,
            notifier,
        }
    }

    pub fn store(&self) -> &LedgerStore<P> {
        &self.store
    }

    #[cfg(test)]
    pub fn conversations(&self) -> &ConversationTracker {
        &self.conversations
    }

    #[cfg(test)]
    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Handles one event. An error has already been reported to the sender
    /// (and logged) by the time it is returned; the ledger is unchanged.
    pub async fn handle(&self, event: InboundEvent) -> Result<(), LedgerError> {
        let sender = event.sender();
        let span = info_span!("event", user = sender, kind = event.kind());
        async move {
            let result = self.route(event).await;
            if let Err(err) = &result {
                self.report(sender, err).await;
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn route(&self, event: InboundEvent) -> Result<(), LedgerError> {
        match event {
            InboundEvent::Start { from, referrer } => self.start(from, referrer).await,
            InboundEvent::Help { from } => {
                self.reply(from, Outbound::text(self.help_text())).await;
                Ok(())
            }
            InboundEvent::Pending { from } => self.list_pending(from).await,
            InboundEvent::Menu { from, item } => self.menu(from, item).await,
            InboundEvent::Text { from, content } => self.text(from, &content).await,
            InboundEvent::Pressed { from, action } => self.pressed(from, action).await,
        }
    }

    async fn start(&self, user: UserId, referrer: Option<UserId>) -> Result<(), LedgerError> {
        self.conversations.clear(user);
        if !self.store.open_account(user, referrer).await? {
            debug!("already registered");
        }
        self.reply(
            user,
            Outbound::text(format!("Welcome! Choose an option:\n{}", menu_line())),
        )
        .await;
        Ok(())
    }

    async fn menu(&self, user: UserId, item: MenuItem) -> Result<(), LedgerError> {
        let message = match item {
            MenuItem::Tasks => Outbound::text("Choose a task:").with_controls(
                TaskKind::ALL.into_iter().map(|kind| {
                    Control::new(
                        format!("{} ({} PKR)", kind.title(), self.config.rewards.for_kind(kind)),
                        Action::ChooseTask { kind },
                    )
                }),
            ),
            MenuItem::Balance => {
                let account = self.store.get_account(user).await;
                Outbound::text(format!(
                    "Balance: {} PKR\nHold: {} PKR\nTasks completed: {}",
                    account.balance(),
                    account.hold(),
                    account.tasks_completed()
                ))
            }
            MenuItem::Withdraw => {
                let rules = self.withdraws.rules();
                Outbound::text(format!(
                    "Choose a withdraw method:\nMinimum {} PKR, or {} USD via Binance.",
                    rules.min_pkr, rules.min_usd
                ))
                .with_controls(WithdrawMethod::ALL.into_iter().map(|method| {
                    Control::new(method.label(), Action::ChooseWithdraw { method })
                }))
            }
            MenuItem::ReferralLink => {
                let account = self.store.get_account(user).await;
                Outbound::text(format!(
                    "Your referral link:\nhttps://t.me/{}?start={user}\n\nReferrals: {}\nEarned: {} PKR\nYou get {} PKR for every task your referrals complete.",
                    self.config.bot_username,
                    account.referrals_count(),
                    account.referral_earned(),
                    self.config.rewards.referral_bonus
                ))
            }
            MenuItem::Help => Outbound::text(self.help_text()),
        };
        self.reply(user, message).await;
        Ok(())
    }

    pub fn help_text(&self) -> String {
        let rewards = &self.config.rewards;
        let rules = &self.config.withdraw;
        format!(
            "📘 HELP MENU\n\n\
             🧾 TASK TYPES:\n\
             • {} - {} PKR\n\
             • {} - {} PKR\n\
             • {} - {} PKR\n\
             • Review Time - {} minutes\n\
             • Referral Bonus - {} PKR\n\n\
             💵 WITHDRAW RULES:\n\
             • Minimum PKR - {}\n\
             • Binance - {} USD minimum\n\
             • Processing - {} hours",
            TaskKind::Generated.title(),
            rewards.generated,
            TaskKind::Own.title(),
            rewards.own,
            TaskKind::Facebook.title(),
            rewards.facebook,
            rewards.review_minutes,
            rewards.referral_bonus,
            rules.min_pkr,
            rules.min_usd,
            rules.processing_hours,
        )
    }

    async fn pressed(&self, user: UserId, action: Action) -> Result<(), LedgerError> {
        match action {
            Action::ChooseTask { kind } => self.choose_task(user, kind).await,
            Action::ChooseWithdraw { method } => self.choose_withdraw(user, method).await,
            Action::SubmitTask { id } => self.submit_task(user, id).await,
            Action::CancelTask { id } => {
                let task = self.tasks.cancel(user, id).await?;
                self.reply(user, Outbound::text(format!("Task #{} cancelled.", task.id)))
                    .await;
                Ok(())
            }
            Action::Decide { decision, target } => match target {
                DecisionTarget::Task { user: owner, id } => {
                    self.decide_task(user, decision, owner, id).await
                }
                DecisionTarget::Withdraw { user: owner, id } => {
                    self.decide_withdraw(user, decision, owner, id).await
                }
            },
        }
    }

    async fn choose_task(&self, user: UserId, kind: TaskKind) -> Result<(), LedgerError> {
        match kind {
            TaskKind::Generated => {
                self.conversations.clear(user);
                let (email, password) = credentials::generate_gmail();
                let task = self
                    .tasks
                    .create_draft(user, TaskPayload::Generated { email, password })
                    .await?;
                self.reply(user, draft_message(&task)).await;
            }
            TaskKind::Own => {
                self.conversations.begin(user, ConversationMode::AwaitingOwnGmail);
                self.reply(
                    user,
                    Outbound::text(format!("Send your Gmail and password:\n{OWN_GMAIL_FORMAT}")),
                )
                .await;
            }
            TaskKind::Facebook => {
                self.conversations
                    .begin(user, ConversationMode::AwaitingFacebookDetails);
                self.reply(
                    user,
                    Outbound::text(format!("Send your Facebook details:\n{FACEBOOK_FORMAT}")),
                )
                .await;
            }
        }
        Ok(())
    }

    async fn choose_withdraw(&self, user: UserId, method: WithdrawMethod) -> Result<(), LedgerError> {
        self.conversations
            .begin(user, ConversationMode::AwaitingWithdrawAmount(method));
        let balance = self.store.get_account(user).await.balance();
        let rules = self.withdraws.rules();
        let prompt = match method.currency() {
            Currency::Usd => format!(
                "Enter amount in USD (minimum {} USD, {} PKR per USD).",
                rules.min_usd, rules.pkr_per_usd
            ),
            Currency::Pkr => format!("Enter amount in PKR (minimum {} PKR).", rules.min_pkr),
        };
        self.reply(
            user,
            Outbound::text(format!("{prompt}\nAvailable: {balance} PKR")),
        )
        .await;
        Ok(())
    }

    /// Free text goes to whichever flow is waiting for it. Input that does
    /// not fit leaves the flow where it is.
    async fn text(&self, user: UserId, content: &str) -> Result<(), LedgerError> {
        let conversation = self.conversations.get(user);
        let token = conversation.draft.token;

        match conversation.mode {
            ConversationMode::Idle => {
                self.reply(
                    user,
                    Outbound::text(format!("Please choose an option:\n{}", menu_line())),
                )
                .await;
                Ok(())
            }
            ConversationMode::AwaitingOwnGmail => {
                let payload = parse_own_gmail(content)?;
                self.finish_task_input(user, &conversation.draft, payload).await
            }
            ConversationMode::AwaitingFacebookDetails => {
                let payload = parse_facebook(content)?;
                self.finish_task_input(user, &conversation.draft, payload).await
            }
            ConversationMode::AwaitingWithdrawAmount(method) => {
                let quote = self.withdraws.quote_for(user, method, content).await?;
                self.conversations.advance(
                    user,
                    token,
                    ConversationMode::AwaitingAccountName(method),
                    |draft| {
                        draft.pkr_amount = Some(quote.pkr_amount);
                        draft.usd_amount = quote.usd_amount;
                    },
                );
                self.reply(user, Outbound::text("Enter the account holder name."))
                    .await;
                Ok(())
            }
            ConversationMode::AwaitingAccountName(method) => {
                let name = content.trim();
                if name.is_empty() {
                    return Err(ValidationError::MalformedInput {
                        expected: "account holder name",
                    }
                    .into());
                }
                let name = name.to_string();
                self.conversations.advance(
                    user,
                    token,
                    ConversationMode::AwaitingAccountNumber(method),
                    |draft| draft.account_name = Some(name),
                );
                self.reply(
                    user,
                    Outbound::text(format!("Enter your {} account number.", method.label())),
                )
                .await;
                Ok(())
            }
            ConversationMode::AwaitingAccountNumber(method) => {
                self.open_withdraw(user, method, conversation.draft, content)
                    .await
            }
        }
    }

    async fn finish_task_input(
        &self,
        user: UserId,
        draft: &Draft,
        payload: TaskPayload,
    ) -> Result<(), LedgerError> {
        let task = self.tasks.create_draft(user, payload).await?;
        self.conversations.finish(user, draft.token);
        self.reply(user, draft_message(&task)).await;
        Ok(())
    }

    /// Last withdraw step. The request and its balance → hold debit are one
    /// ledger mutation keyed by the draft token, so replaying this step
    /// cannot debit twice.
    async fn open_withdraw(
        &self,
        user: UserId,
        method: WithdrawMethod,
        draft: Draft,
        input: &str,
    ) -> Result<(), LedgerError> {
        let account_number = input.trim();
        if account_number.is_empty() {
            return Err(ValidationError::MalformedInput {
                expected: "account number",
            }
            .into());
        }
        let (Some(pkr_amount), Some(account_name)) = (draft.pkr_amount, draft.account_name)
        else {
            self.conversations.finish(user, draft.token);
            return Err(LedgerError::Inconsistency {
                user,
                detail: "withdraw draft reached the last step incomplete".into(),
            });
        };

        let new = NewWithdraw {
            method,
            account_name,
            account_number: account_number.to_string(),
            pkr_amount,
            usd_amount: draft.usd_amount,
            draft_token: draft.token,
        };
        let (request, created) = match self.withdraws.open(user, new).await {
            Ok(opened) => opened,
            Err(err @ LedgerError::Validation(ValidationError::InsufficientBalance { .. })) => {
                self.conversations.finish(user, draft.token);
                info!(user, "withdraw flow aborted, balance no longer covers it");
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        self.conversations.finish(user, draft.token);

        self.reply(
            user,
            Outbound::text(format!(
                "✅ Withdraw request #{} submitted: {} via {}.\nProcessing time: up to {} hours.",
                request.id,
                request.amount_display(),
                request.method.label(),
                self.withdraws.rules().processing_hours
            )),
        )
        .await;
        if created {
            self.alert_admin(withdraw_review_message(user, &request)).await;
        }
        Ok(())
    }

    async fn submit_task(&self, user: UserId, id: TaskId) -> Result<(), LedgerError> {
        let task = self.tasks.submit(user, id).await?;
        self.reply(
            user,
            Outbound::text(format!(
                "⏳ Task #{} submitted for review. Review time: about {} minutes.",
                task.id, self.config.rewards.review_minutes
            )),
        )
        .await;
        self.alert_admin(task_review_message(user, &task)).await;
        Ok(())
    }

    async fn decide_task(
        &self,
        actor: UserId,
        decision: Decision,
        owner: UserId,
        id: TaskId,
    ) -> Result<(), LedgerError> {
        let resolution = self.tasks.decide(actor, decision, owner, id).await?;
        let task = &resolution.task;

        self.reply(
            actor,
            Outbound::text(format!("Task #{} of user {owner}: {}.", task.id, task.status)),
        )
        .await;

        let text = match decision {
            Decision::Approve => format!(
                "✅ Task #{} approved! +{} PKR added to your balance.",
                task.id, task.reward
            ),
            Decision::Reject => format!("❌ Task #{} was rejected.", task.id),
        };
        self.reply(owner, Outbound::text(text)).await;

        if let Some(credit) = resolution.referral {
            self.reply(
                credit.referrer,
                Outbound::text(format!(
                    "🎉 Referral bonus: +{} PKR from user {}'s task.",
                    credit.bonus, credit.referred
                )),
            )
            .await;
        }
        Ok(())
    }

    async fn decide_withdraw(
        &self,
        actor: UserId,
        decision: Decision,
        owner: UserId,
        id: WithdrawId,
    ) -> Result<(), LedgerError> {
        let request = self.withdraws.decide(actor, decision, owner, id).await?;

        self.reply(
            actor,
            Outbound::text(format!(
                "Withdraw #{} of user {owner}: {}.",
                request.id, request.status
            )),
        )
        .await;

        let text = match decision {
            Decision::Approve => format!(
                "✅ Withdraw #{} approved: {} via {}.",
                request.id,
                request.amount_display(),
                request.method.label()
            ),
            Decision::Reject => format!(
                "❌ Withdraw #{} was rejected. {} PKR returned to your balance.",
                request.id, request.pkr_amount
            ),
        };
        self.reply(owner, Outbound::text(text)).await;
        Ok(())
    }

    /// Admin listing of everything awaiting a decision, with controls.
    async fn list_pending(&self, actor: UserId) -> Result<(), LedgerError> {
        workflow::authorize(self.admins.as_ref(), actor)?;
        let items = self.store.pending_review().await;
        if items.is_empty() {
            self.reply(actor, Outbound::text("No pending items.")).await;
            return Ok(());
        }

        self.reply(
            actor,
            Outbound::text(format!("{} item(s) waiting for review:", items.len())),
        )
        .await;
        for item in &items {
            let message = match item {
                PendingItem::Task { user, task } => task_review_message(*user, task),
                PendingItem::Withdraw { user, request } => withdraw_review_message(*user, request),
            };
            self.reply(actor, message).await;
        }
        Ok(())
    }

    async fn report(&self, user: UserId, err: &LedgerError) {
        let text = if err.is_user_facing() {
            debug!(error = %err, "event refused");
            format!("⚠️ {err}")
        } else {
            error!(error = %err, "event failed");
            "⚠️ Something went wrong. Please try again later.".to_string()
        };
        self.reply(user, Outbound::text(text)).await;
    }

    async fn reply(&self, user: UserId, message: Outbound) {
        if let Err(err) = self.notifier.send_to_user(user, message).await {
            warn!(to = user, error = %err, "notification failed");
        }
    }

    async fn alert_admin(&self, message: Outbound) {
        if let Err(err) = self.notifier.send_to_admin(message).await {
            warn!(to = "admin", error = %err, "notification failed");
        }
    }
}

fn menu_line() -> String {
    MenuItem::ALL
        .iter()
        .map(MenuItem::label)
        .collect::<Vec<_>>()
        .join(" | ")
}

fn parse_own_gmail(input: &str) -> Result<TaskPayload, ValidationError> {
    match input.split_whitespace().collect::<Vec<_>>().as_slice() {
        [email, password] if email.contains('@') => Ok(TaskPayload::Own {
            email: email.to_string(),
            password: password.to_string(),
        }),
        _ => Err(ValidationError::MalformedInput {
            expected: OWN_GMAIL_FORMAT,
        }),
    }
}

fn parse_facebook(input: &str) -> Result<TaskPayload, ValidationError> {
    match input.split_whitespace().collect::<Vec<_>>().as_slice() {
        [facebook_id, email, password, code] => Ok(TaskPayload::Facebook {
            facebook_id: facebook_id.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            two_factor_code: code.to_string(),
        }),
        _ => Err(ValidationError::MalformedInput {
            expected: FACEBOOK_FORMAT,
        }),
    }
}

fn draft_message(task: &Task) -> Outbound {
    Outbound::text(format!(
        "📝 Task #{}: {}\n{}\nReward: {} PKR",
        task.id,
        task.kind().title(),
        task.payload.describe(),
        task.reward
    ))
    .with_control(Control::new("✅ Submit", Action::SubmitTask { id: task.id }))
    .with_control(Control::new("❌ Cancel", Action::CancelTask { id: task.id }))
}

fn decision_controls(target: DecisionTarget) -> [Control; 2] {
    [
        Control::new(
            "✅ Approve",
            Action::Decide {
                decision: Decision::Approve,
                target,
            },
        ),
        Control::new(
            "❌ Reject",
            Action::Decide {
                decision: Decision::Reject,
                target,
            },
        ),
    ]
}

fn task_review_message(user: UserId, task: &Task) -> Outbound {
    Outbound::text(format!(
        "🆕 Task #{} from user {user}\nType: {}\nReward: {} PKR\n{}",
        task.id,
        task.kind().title(),
        task.reward,
        task.payload.describe()
    ))
    .with_controls(decision_controls(DecisionTarget::Task { user, id: task.id }))
}

fn withdraw_review_message(user: UserId, request: &WithdrawRequest) -> Outbound {
    Outbound::text(format!(
        "💸 Withdraw #{} from user {user}\nMethod: {}\nAmount: {}\nName: {}\nNumber: {}",
        request.id,
        request.method.label(),
        request.amount_display(),
        request.account_name,
        request.account_number
    ))
    .with_controls(decision_controls(DecisionTarget::Withdraw {
        user,
        id: request.id,
    }))
}
