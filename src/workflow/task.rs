use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::auth::{AdminPolicy, authorize};
use super::referral::{self, ReferralCredit};
use super::Decision;
use crate::config::RewardConfig;
use crate::error::{LedgerError, RecordKind};
use crate::ledger::{
    InMemory, LedgerStore, Persistence, Task, TaskId, TaskPayload, TaskStatus, UserId,
};

/// Outcome of an admin decision on a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResolution {
    pub user: UserId,
    pub task: Task,
    /// Set when approval paid a referral bonus.
    pub referral: Option<ReferralCredit>,
}

/// Drives tasks through draft → pending_admin → approved | rejected and
/// applies the matching ledger effect in the same atomic step.
pub struct TaskWorkflow<P: Persistence = InMemory> {
    store: Arc<LedgerStore<P>>,
    rewards: RewardConfig,
    admins: Arc<dyn AdminPolicy>,
}

impl<P: Persistence> TaskWorkflow<P> {
    pub fn new(store: Arc<LedgerStore<P>>, rewards: RewardConfig, admins: Arc<dyn AdminPolicy>) -> Self {
        Self {
            store,
            rewards,
            admins,
        }
    }

    /// Stores the collected details as a draft. No money moves.
    pub async fn create_draft(&self, user: UserId, payload: TaskPayload) -> Result<Task, LedgerError> {
        let reward = self.rewards.for_kind(payload.kind());
        let task = self
            .store
            .mutate_account(user, |account| Ok(account.add_task(payload, reward).clone()))
            .await?;
        info!(user, task = task.id, kind = %task.kind(), reward, "task drafted");
        Ok(task)
    }

    /// draft → pending_admin; the reward goes on hold.
    pub async fn submit(&self, user: UserId, task_id: TaskId) -> Result<Task, LedgerError> {
        let task = self
            .store
            .mutate_existing(user, |account| {
                let task =
                    account.update_task_status(task_id, TaskStatus::Draft, TaskStatus::PendingAdmin)?;
                account.reserve(task.reward)?;
                Ok(task)
            })
            .await
            .map_err(|e| missing_account_as_task(e, user, task_id))?;
        info!(user, task = task_id, hold_added = task.reward, "task submitted");
        Ok(task)
    }

    /// Discards a draft. Nothing was held, so nothing is released.
    pub async fn cancel(&self, user: UserId, task_id: TaskId) -> Result<Task, LedgerError> {
        let task = self
            .store
            .mutate_existing(user, |account| account.remove_draft(task_id))
            .await
            .map_err(|e| missing_account_as_task(e, user, task_id))?;
        info!(user, task = task_id, "task draft cancelled");
        Ok(task)
    }

    pub async fn decide(
        &self,
        actor: UserId,
        decision: Decision,
        user: UserId,
        task_id: TaskId,
    ) -> Result<TaskResolution, LedgerError> {
        match decision {
            Decision::Approve => self.approve(actor, user, task_id).await,
            Decision::Reject => self.reject(actor, user, task_id).await,
        }
    }

    /// pending_admin → approved: hold → balance, completed counter, then the
    /// referral bonus, all under one pair lock.
    pub async fn approve(
        &self,
        actor: UserId,
        user: UserId,
        task_id: TaskId,
    ) -> Result<TaskResolution, LedgerError> {
        authorize(self.admins.as_ref(), actor)?;

        // The referrer is fixed at registration, so reading it before
        // locking is safe and lets us lock both accounts in id order.
        let referrer = self
            .store
            .find_account(user)
            .await
            .ok_or(LedgerError::NotFound {
                kind: RecordKind::Task,
                user,
                id: task_id,
            })?
            .referrer();
        let bonus = self.rewards.referral_bonus;

        let resolution = self
            .store
            .mutate_pair(user, referrer, |account, referrer_account| {
                let task = account.update_task_status(
                    task_id,
                    TaskStatus::PendingAdmin,
                    TaskStatus::Approved,
                )?;
                account.release_to_balance(task.reward)?;
                account.record_task_completed();
                let referral = referral::cascade(user, referrer_account, bonus)?;
                Ok(TaskResolution {
                    user,
                    task,
                    referral,
                })
            })
            .await?;

        info!(
            user,
            task = task_id,
            reward = resolution.task.reward,
            referrer = ?resolution.referral.map(|r| r.referrer),
            "task approved"
        );
        Ok(resolution)
    }

    /// pending_admin → rejected: the reward leaves hold, balance untouched.
    pub async fn reject(
        &self,
        actor: UserId,
        user: UserId,
        task_id: TaskId,
    ) -> Result<TaskResolution, LedgerError> {
        authorize(self.admins.as_ref(), actor)?;

        let task = self
            .store
            .mutate_existing(user, |account| {
                let task = account.update_task_status(
                    task_id,
                    TaskStatus::PendingAdmin,
                    TaskStatus::Rejected,
                )?;
                account.release(task.reward)?;
                Ok(task)
            })
            .await
            .map_err(|e| missing_account_as_task(e, user, task_id))?;

        info!(user, task = task_id, released = task.reward, "task rejected");
        Ok(TaskResolution {
            user,
            task,
            referral: None,
        })
    }
}

fn missing_account_as_task(err: LedgerError, user: UserId, id: TaskId) -> LedgerError {
    match err {
        LedgerError::AccountNotFound(_) => LedgerError::NotFound {
            kind: RecordKind::Task,
            user,
            id,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::SingleAdmin;

    const ADMIN: UserId = 1000;

    fn setup() -> (Arc<LedgerStore>, TaskWorkflow) {
        let store = Arc::new(LedgerStore::in_memory());
        let flow = TaskWorkflow::new(
            Arc::clone(&store),
            RewardConfig::default(),
            Arc::new(SingleAdmin(ADMIN)),
        );
        (store, flow)
    }

    fn generated() -> TaskPayload {
        TaskPayload::Generated {
            email: "k2j4h5g6@gmail.com".into(),
            password: "Abcdef123456".into(),
        }
    }

    async fn submitted(store: &LedgerStore, flow: &TaskWorkflow, user: UserId) -> TaskId {
        store.open_account(user, None).await.unwrap();
        let task = flow.create_draft(user, generated()).await.unwrap();
        flow.submit(user, task.id).await.unwrap();
        task.id
    }

    #[tokio::test]
    async fn submit_then_approve_moves_reward_to_balance() {
        let (store, flow) = setup();
        let id = submitted(&store, &flow, 1).await;

        let acct = store.get_account(1).await;
        assert_eq!((acct.balance(), acct.hold()), (0, 40));

        let res = flow.approve(ADMIN, 1, id).await.unwrap();
        assert_eq!(res.task.status, TaskStatus::Approved);
        assert_eq!(res.referral, None);

        let acct = store.get_account(1).await;
        assert_eq!((acct.balance(), acct.hold()), (40, 0));
        assert_eq!(acct.tasks_completed(), 1);
    }

    #[tokio::test]
    async fn reject_releases_hold_without_paying() {
        let (store, flow) = setup();
        let id = submitted(&store, &flow, 1).await;

        flow.reject(ADMIN, 1, id).await.unwrap();
        let acct = store.get_account(1).await;
        assert_eq!((acct.balance(), acct.hold()), (0, 0));
        assert_eq!(acct.tasks_completed(), 0);
    }

    #[tokio::test]
    async fn second_decision_is_already_processed() {
        let (store, flow) = setup();
        let id = submitted(&store, &flow, 1).await;
        flow.approve(ADMIN, 1, id).await.unwrap();

        for decision in [Decision::Approve, Decision::Reject] {
            let err = flow.decide(ADMIN, decision, 1, id).await.unwrap_err();
            assert!(matches!(err, LedgerError::AlreadyProcessed { .. }));
        }
        let acct = store.get_account(1).await;
        assert_eq!((acct.balance(), acct.hold(), acct.tasks_completed()), (40, 0, 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicate_approvals_pay_once() {
        let (store, flow) = setup();
        let flow = Arc::new(flow);
        store.open_account(2, None).await.unwrap();
        store.open_account(1, Some(2)).await.unwrap();
        let task = flow.create_draft(1, generated()).await.unwrap();
        flow.submit(1, task.id).await.unwrap();
        let task_id = task.id;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let flow = Arc::clone(&flow);
            handles.push(tokio::spawn(async move { flow.approve(ADMIN, 1, task_id).await }));
        }
        let mut ok = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(LedgerError::AlreadyProcessed { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(ok, 1);
        let acct = store.get_account(1).await;
        assert_eq!((acct.balance(), acct.hold()), (40, 0));
        let referrer = store.get_account(2).await;
        assert_eq!((referrer.balance(), referrer.referral_earned()), (2, 2));
    }

    #[tokio::test]
    async fn referral_pays_direct_referrer_only() {
        let (store, flow) = setup();
        store.open_account(3, None).await.unwrap();
        store.open_account(2, Some(3)).await.unwrap();
        store.open_account(1, Some(2)).await.unwrap();

        let task = flow.create_draft(1, generated()).await.unwrap();
        flow.submit(1, task.id).await.unwrap();
        let res = flow.approve(ADMIN, 1, task.id).await.unwrap();

        assert_eq!(
            res.referral,
            Some(ReferralCredit {
                referrer: 2,
                referred: 1,
                bonus: 2
            })
        );
        assert_eq!(store.get_account(2).await.balance(), 2);
        assert_eq!(store.get_account(3).await.balance(), 0);
        assert_eq!(store.get_account(3).await.referral_earned(), 0);
    }

    #[tokio::test]
    async fn rejection_pays_no_referral() {
        let (store, flow) = setup();
        store.open_account(2, None).await.unwrap();
        store.open_account(1, Some(2)).await.unwrap();
        let task = flow.create_draft(1, generated()).await.unwrap();
        flow.submit(1, task.id).await.unwrap();
        flow.reject(ADMIN, 1, task.id).await.unwrap();
        assert_eq!(store.get_account(2).await.balance(), 0);
    }

    #[tokio::test]
    async fn non_admin_cannot_decide() {
        let (store, flow) = setup();
        let id = submitted(&store, &flow, 1).await;

        let err = flow.approve(1, 1, id).await.unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized(1)));
        let acct = store.get_account(1).await;
        assert_eq!((acct.balance(), acct.hold()), (0, 40));
    }

    #[tokio::test]
    async fn unknown_references_are_not_found() {
        let (store, flow) = setup();
        submitted(&store, &flow, 1).await;

        let err = flow.approve(ADMIN, 1, 999).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { id: 999, .. }));
        let err = flow.reject(ADMIN, 55, 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { user: 55, .. }));
        let err = flow.approve(ADMIN, 55, 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { user: 55, .. }));
    }

    #[tokio::test]
    async fn approving_a_draft_is_invalid() {
        let (store, flow) = setup();
        store.open_account(1, None).await.unwrap();
        let task = flow.create_draft(1, generated()).await.unwrap();

        let err = flow.approve(ADMIN, 1, task.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
        assert_eq!(store.get_account(1).await.balance(), 0);
    }

    #[tokio::test]
    async fn cancel_discards_draft_without_ledger_effect() {
        let (store, flow) = setup();
        store.open_account(1, None).await.unwrap();
        let task = flow.create_draft(1, generated()).await.unwrap();

        flow.cancel(1, task.id).await.unwrap();
        let acct = store.get_account(1).await;
        assert!(acct.task(task.id).is_none());
        assert_eq!((acct.balance(), acct.hold()), (0, 0));

        let err = flow.submit(1, task.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn facebook_reward_comes_from_config() {
        let (store, flow) = setup();
        store.open_account(1, None).await.unwrap();
        let task = flow
            .create_draft(
                1,
                TaskPayload::Facebook {
                    facebook_id: "1000123".into(),
                    email: "fb@gmail.com".into(),
                    password: "pw".into(),
                    two_factor_code: "JBSWY3DP".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(task.reward, 12);
        flow.submit(1, task.id).await.unwrap();
        assert_eq!(store.get_account(1).await.hold(), 12);
    }
}
