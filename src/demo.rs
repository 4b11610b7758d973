//! Scripted walkthrough of the ledger rules against an in-memory store.

use std::sync::Arc;

use anyhow::Result;

use crate::bot::Dispatcher;
use crate::config::AppConfig;
use crate::event::{Action, DecisionTarget, InboundEvent};
use crate::ledger::{Amount, LedgerStore, TaskKind, UserId, WithdrawMethod};
use crate::notify::ConsoleNotifier;
use crate::ui::LedgerView;
use crate::workflow::Decision;

/// Admin id used when the configuration has none.
const DEMO_ADMIN: UserId = 1000;

enum Step {
    /// Seeds a balance directly, standing in for earlier approved tasks.
    Fund(UserId, Amount),
    Event(InboundEvent),
}

struct Scenario {
    title: &'static str,
    steps: Vec<Step>,
}

fn text(from: UserId, content: &str) -> Step {
    Step::Event(InboundEvent::classify_text(from, content))
}

fn press(from: UserId, action: Action) -> Step {
    Step::Event(InboundEvent::Pressed { from, action })
}

fn decide(admin: UserId, decision: Decision, target: DecisionTarget) -> Step {
    press(admin, Action::Decide { decision, target })
}

fn withdraw_flow(user: UserId, method: WithdrawMethod, amount: &str) -> Vec<Step> {
    vec![
        press(user, Action::ChooseWithdraw { method }),
        text(user, amount),
        text(user, "Ali Khan"),
        text(user, "PK00123456"),
    ]
}

fn scenarios(admin: UserId) -> Vec<Scenario> {
    let mut rejected = vec![Step::Fund(12, 250)];
    rejected.extend(withdraw_flow(12, WithdrawMethod::Bank, "200"));
    rejected.push(decide(
        admin,
        Decision::Reject,
        DecisionTarget::Withdraw { user: 12, id: 1 },
    ));

    let mut approved = vec![Step::Fund(13, 250)];
    approved.extend(withdraw_flow(13, WithdrawMethod::Easypaisa, "200"));
    approved.push(decide(
        admin,
        Decision::Approve,
        DecisionTarget::Withdraw { user: 13, id: 1 },
    ));

    vec![
        Scenario {
            title: "Task approval pays the user and the direct referrer",
            steps: vec![
                text(21, "/start"),
                text(11, "/start 21"),
                press(11, Action::ChooseTask { kind: TaskKind::Generated }),
                press(11, Action::SubmitTask { id: 1 }),
                decide(admin, Decision::Approve, DecisionTarget::Task { user: 11, id: 1 }),
                decide(admin, Decision::Approve, DecisionTarget::Task { user: 11, id: 1 }),
            ],
        },
        Scenario {
            title: "Rejected withdraw returns the principal",
            steps: rejected,
        },
        Scenario {
            title: "Approved withdraw leaves the balance as it was",
            steps: approved,
        },
        Scenario {
            title: "Binance amount above balance is refused at entry",
            steps: vec![
                Step::Fund(14, 50),
                press(14, Action::ChooseWithdraw { method: WithdrawMethod::Binance }),
                text(14, "1"),
            ],
        },
        Scenario {
            title: "Cancelled draft has no ledger effect",
            steps: vec![
                press(15, Action::ChooseTask { kind: TaskKind::Own }),
                text(15, "someone@gmail.com s3cret"),
                press(15, Action::CancelTask { id: 1 }),
            ],
        },
        Scenario {
            title: "Review listing",
            steps: vec![
                press(16, Action::ChooseTask { kind: TaskKind::Facebook }),
                text(16, "fb.1001 someone@mail.com s3cret 123456"),
                press(16, Action::SubmitTask { id: 1 }),
                text(admin, "/pending"),
            ],
        },
    ]
}

pub async fn run(mut config: AppConfig) -> Result<()> {
    if config.admin_id == 0 {
        config.admin_id = DEMO_ADMIN;
    }
    let admin = config.admin_id;
    let dispatcher = Dispatcher::new(
        config,
        Arc::new(LedgerStore::in_memory()),
        ConsoleNotifier::new(),
    );
    let view = LedgerView::new();

    for scenario in scenarios(admin) {
        view.heading(scenario.title);
        for step in scenario.steps {
            match step {
                Step::Fund(user, amount) => {
                    dispatcher
                        .store()
                        .mutate_account(user, |account| account.credit(amount))
                        .await?;
                }
                // Refusals are part of the script and were already shown.
                Step::Event(event) => {
                    let _ = dispatcher.handle(event).await;
                }
            }
        }
    }

    view.heading("Accounts");
    view.print_accounts(&dispatcher.store().accounts().await);
    Ok(())
}
