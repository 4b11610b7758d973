use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::account::Account;
use super::persistence::{InMemory, Persistence};
use super::task::{Task, TaskStatus};
use super::withdraw::{WithdrawRequest, WithdrawStatus};
use super::UserId;
use crate::error::LedgerError;

/// A record waiting for an admin decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum PendingItem {
    Task { user: UserId, task: Task },
    Withdraw { user: UserId, request: WithdrawRequest },
}

/// Accounts keyed by user id, each behind its own async mutex.
///
/// Mutations are all-or-nothing: the closure works on a clone of the
/// aggregate, and the clone replaces the live copy only after it passes
/// [`Account::verify`] and has been handed to the persistence backend.
pub struct LedgerStore<P: Persistence = InMemory> {
    accounts: DashMap<UserId, Arc<Mutex<Account>>>,
    persistence: Arc<P>,
}

impl LedgerStore<InMemory> {
    pub fn in_memory() -> Self {
        Self {
            accounts: DashMap::new(),
            persistence: Arc::new(InMemory),
        }
    }
}

impl<P: Persistence> LedgerStore<P> {
    /// Loads every stored account. Refuses to start on an account whose hold
    /// does not match its pending records.
    pub fn open(persistence: P) -> Result<Self, LedgerError> {
        let accounts = DashMap::new();
        for account in persistence.load_all()? {
            account.verify()?;
            accounts.insert(account.user_id(), Arc::new(Mutex::new(account)));
        }
        info!(accounts = accounts.len(), "ledger loaded");
        Ok(Self {
            accounts,
            persistence: Arc::new(persistence),
        })
    }

    fn slot(&self, id: UserId) -> Arc<Mutex<Account>> {
        Arc::clone(
            self.accounts
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(Account::new(id))))
                .value(),
        )
    }

    fn existing(&self, id: UserId) -> Option<Arc<Mutex<Account>>> {
        self.accounts.get(&id).map(|e| Arc::clone(e.value()))
    }

    #[cfg(test)]
    pub fn contains(&self, id: UserId) -> bool {
        self.accounts.contains_key(&id)
    }

    /// Snapshot of an account, created on first contact.
    pub async fn get_account(&self, id: UserId) -> Account {
        self.slot(id).lock().await.clone()
    }

    pub async fn find_account(&self, id: UserId) -> Option<Account> {
        match self.existing(id) {
            Some(slot) => Some(slot.lock().await.clone()),
            None => None,
        }
    }

    /// Registers a user on first contact and links the referrer.
    ///
    /// Returns `false` (and changes nothing) when the account already exists.
    /// The referrer's `referrals_count` only moves if that account exists.
    /// If the new account cannot be stored it is dropped again, so a retry
    /// registers from scratch.
    pub async fn open_account(
        &self,
        id: UserId,
        referrer: Option<UserId>,
    ) -> Result<bool, LedgerError> {
        let inserted = match self.accounts.entry(id) {
            Entry::Occupied(_) => return Ok(false),
            Entry::Vacant(v) => {
                let slot = v.insert(Arc::new(Mutex::new(Account::new(id))));
                Arc::clone(slot.value())
            }
        };

        let referrer = referrer.filter(|r| *r != id);
        let linked = self
            .mutate_pair(id, referrer, |account, referrer_account| {
                if let Some(r) = referrer {
                    account.set_referrer(r);
                }
                if let Some(ra) = referrer_account {
                    ra.record_referral();
                }
                Ok(())
            })
            .await;
        if let Err(err) = linked {
            self.accounts.remove_if(&id, |_, slot| Arc::ptr_eq(slot, &inserted));
            warn!(user = id, error = %err, "account not opened");
            return Err(err);
        }

        info!(user = id, referrer = ?referrer, "account opened");
        Ok(true)
    }

    /// Atomic read-modify-write of one account, creating it if needed.
    pub async fn mutate_account<T>(
        &self,
        id: UserId,
        f: impl FnOnce(&mut Account) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let slot = self.slot(id);
        let mut live = slot.lock().await;
        let mut next = live.clone();
        let out = f(&mut next)?;
        self.check(&next)?;
        self.persist(vec![next.clone()]).await?;
        *live = next;
        Ok(out)
    }

    /// Like [`mutate_account`](Self::mutate_account) but never creates.
    pub async fn mutate_existing<T>(
        &self,
        id: UserId,
        f: impl FnOnce(&mut Account) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let slot = self.existing(id).ok_or(LedgerError::AccountNotFound(id))?;
        let mut live = slot.lock().await;
        let mut next = live.clone();
        let out = f(&mut next)?;
        self.check(&next)?;
        self.persist(vec![next.clone()]).await?;
        *live = next;
        Ok(out)
    }

    /// Atomic read-modify-write of an existing account plus, optionally, a
    /// second existing account. Locks are taken in ascending user id order.
    /// A missing or identical secondary is passed to `f` as `None`.
    pub async fn mutate_pair<T>(
        &self,
        primary: UserId,
        secondary: Option<UserId>,
        f: impl FnOnce(&mut Account, Option<&mut Account>) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let primary_slot = self
            .existing(primary)
            .ok_or(LedgerError::AccountNotFound(primary))?;
        let secondary = secondary
            .filter(|s| *s != primary)
            .and_then(|s| self.existing(s).map(|slot| (s, slot)));

        let Some((secondary_id, secondary_slot)) = secondary else {
            let mut live = primary_slot.lock().await;
            let mut next = live.clone();
            let out = f(&mut next, None)?;
            self.check(&next)?;
            self.persist(vec![next.clone()]).await?;
            *live = next;
            return Ok(out);
        };

        let (mut live_primary, mut live_secondary) = if primary < secondary_id {
            let p = primary_slot.lock().await;
            let s = secondary_slot.lock().await;
            (p, s)
        } else {
            let s = secondary_slot.lock().await;
            let p = primary_slot.lock().await;
            (p, s)
        };
        debug!(primary, secondary = secondary_id, "pair locked");

        let mut next_primary = live_primary.clone();
        let mut next_secondary = live_secondary.clone();
        let out = f(&mut next_primary, Some(&mut next_secondary))?;
        self.check(&next_primary)?;
        self.check(&next_secondary)?;
        self.persist(vec![next_primary.clone(), next_secondary.clone()]).await?;
        *live_primary = next_primary;
        *live_secondary = next_secondary;
        Ok(out)
    }

    /// Hands the accounts to the backend on a blocking thread. The caller
    /// still holds the account locks.
    async fn persist(&self, accounts: Vec<Account>) -> Result<(), LedgerError> {
        let persistence = Arc::clone(&self.persistence);
        tokio::task::spawn_blocking(move || persistence.save_all(&accounts))
            .await
            .map_err(|e| LedgerError::Io(std::io::Error::other(e)))?
    }

    fn check(&self, account: &Account) -> Result<(), LedgerError> {
        account.verify().inspect_err(|e| {
            error!(user = account.user_id(), error = %e, "refusing to commit account");
        })
    }

    /// Snapshot of every account, ordered by user id.
    pub async fn accounts(&self) -> Vec<Account> {
        let slots: Vec<_> = self.accounts.iter().map(|e| Arc::clone(e.value())).collect();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            out.push(slot.lock().await.clone());
        }
        out.sort_by_key(|a| a.user_id());
        out
    }

    /// Every task awaiting review and every pending withdraw, oldest first.
    pub async fn pending_review(&self) -> Vec<PendingItem> {
        let mut items: Vec<(chrono::DateTime<chrono::Utc>, PendingItem)> = Vec::new();
        for account in self.accounts().await {
            let user = account.user_id();
            for task in account.tasks().filter(|t| t.status == TaskStatus::PendingAdmin) {
                items.push((
                    task.updated_at,
                    PendingItem::Task {
                        user,
                        task: task.clone(),
                    },
                ));
            }
            for request in account
                .withdraws()
                .filter(|w| w.status == WithdrawStatus::Pending)
            {
                items.push((
                    request.created_at,
                    PendingItem::Withdraw {
                        user,
                        request: request.clone(),
                    },
                ));
            }
        }
        items.sort_by_key(|(at, _)| *at);
        items.into_iter().map(|(_, item)| item).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::ledger::{JsonDir, TaskPayload};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    /// Backend whose writes fail while the shared flag is set.
    struct FlakyDisk(Arc<AtomicBool>);

    impl Persistence for FlakyDisk {
        fn load_all(&self) -> Result<Vec<Account>, LedgerError> {
            Ok(Vec::new())
        }

        fn save_all(&self, _accounts: &[Account]) -> Result<(), LedgerError> {
            if self.0.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("disk unavailable").into());
            }
            Ok(())
        }
    }

    fn payload() -> TaskPayload {
        TaskPayload::Own {
            email: "me@gmail.com".into(),
            password: "pw".into(),
        }
    }

    #[tokio::test]
    async fn get_account_creates_on_demand() {
        let store = LedgerStore::in_memory();
        assert!(!store.contains(5));
        let acct = store.get_account(5).await;
        assert_eq!(acct.user_id(), 5);
        assert!(store.contains(5));
        assert!(store.find_account(6).await.is_none());
    }

    #[tokio::test]
    async fn failed_closure_leaves_account_untouched() {
        let store = LedgerStore::in_memory();
        store.mutate_account(1, |a| a.credit(100)).await.unwrap();

        let err = store
            .mutate_account(1, |a| {
                a.credit(50)?;
                a.lock(1_000)
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Validation(ValidationError::InsufficientBalance { .. })
        ));
        assert_eq!(store.get_account(1).await.balance(), 100);
    }

    #[tokio::test]
    async fn unverifiable_result_is_not_committed() {
        let store = LedgerStore::in_memory();
        let err = store.mutate_account(1, |a| a.reserve(40)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Inconsistency { .. }));
        assert_eq!(store.get_account(1).await.hold(), 0);
    }

    #[tokio::test]
    async fn mutate_existing_requires_account() {
        let store = LedgerStore::in_memory();
        let err = store.mutate_existing(9, |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(9)));
    }

    #[tokio::test]
    async fn open_account_links_referrer_once() {
        let store = LedgerStore::in_memory();
        assert!(store.open_account(1, None).await.unwrap());
        assert!(store.open_account(2, Some(1)).await.unwrap());
        assert!(!store.open_account(2, Some(3)).await.unwrap());

        assert_eq!(store.get_account(2).await.referrer(), Some(1));
        assert_eq!(store.get_account(1).await.referrals_count(), 1);
    }

    #[tokio::test]
    async fn open_account_ignores_self_referral() {
        let store = LedgerStore::in_memory();
        store.open_account(4, Some(4)).await.unwrap();
        let acct = store.get_account(4).await;
        assert_eq!(acct.referrer(), None);
        assert_eq!(acct.referrals_count(), 0);
    }

    #[tokio::test]
    async fn open_account_with_unknown_referrer_records_link_only() {
        let store = LedgerStore::in_memory();
        store.open_account(2, Some(77)).await.unwrap();
        assert_eq!(store.get_account(2).await.referrer(), Some(77));
        assert!(!store.contains(77));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pair_mutation_in_both_lock_orders() {
        let store = Arc::new(LedgerStore::in_memory());
        store.open_account(1, None).await.unwrap();
        store.open_account(2, None).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..50u64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let (p, s) = if i % 2 == 0 { (1, 2) } else { (2, 1) };
                store
                    .mutate_pair(p, Some(s), |a, b| {
                        a.credit(1)?;
                        b.map(|b| b.credit(1)).transpose()?;
                        Ok(())
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(store.get_account(1).await.balance(), 50);
        assert_eq!(store.get_account(2).await.balance(), 50);
    }

    #[tokio::test]
    async fn pending_review_lists_live_records() {
        let store = LedgerStore::in_memory();
        store
            .mutate_account(1, |a| {
                let id = a.add_task(payload(), 40).id;
                a.update_task_status(id, TaskStatus::Draft, TaskStatus::PendingAdmin)?;
                a.reserve(40)
            })
            .await
            .unwrap();
        store
            .mutate_account(2, |a| {
                a.add_task(payload(), 40);
                Ok(())
            })
            .await
            .unwrap();

        let pending = store.pending_review().await;
        assert_eq!(pending.len(), 1);
        assert!(matches!(&pending[0], PendingItem::Task { user: 1, task } if task.reward == 40));
    }

    #[tokio::test]
    async fn reopening_a_json_store_restores_accounts() {
        let tmp = TempDir::new().unwrap();
        {
            let store = LedgerStore::open(JsonDir::open(tmp.path()).unwrap()).unwrap();
            store.open_account(1, None).await.unwrap();
            store.mutate_account(1, |a| a.credit(250)).await.unwrap();
        }
        let store = LedgerStore::open(JsonDir::open(tmp.path()).unwrap()).unwrap();
        assert_eq!(store.get_account(1).await.balance(), 250);
    }

    #[tokio::test]
    async fn failed_open_account_can_be_retried() {
        let down = Arc::new(AtomicBool::new(false));
        let store = LedgerStore::open(FlakyDisk(Arc::clone(&down))).unwrap();
        store.open_account(1, None).await.unwrap();

        down.store(true, Ordering::SeqCst);
        let err = store.open_account(2, Some(1)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Io(_)));
        assert!(!store.contains(2));
        assert_eq!(store.get_account(1).await.referrals_count(), 0);

        down.store(false, Ordering::SeqCst);
        assert!(store.open_account(2, Some(1)).await.unwrap());
        assert_eq!(store.get_account(2).await.referrer(), Some(1));
        assert_eq!(store.get_account(1).await.referrals_count(), 1);
    }

    #[tokio::test]
    async fn failed_pair_write_commits_neither_account() {
        let tmp = TempDir::new().unwrap();
        let store = LedgerStore::open(JsonDir::open(tmp.path()).unwrap()).unwrap();
        store.open_account(1, None).await.unwrap();
        store.open_account(2, None).await.unwrap();
        std::fs::create_dir(tmp.path().join("2.json.tmp")).unwrap();

        let err = store
            .mutate_pair(1, Some(2), |a, b| {
                a.credit(5)?;
                b.map(|b| b.credit(5)).transpose()?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Io(_)));
        assert_eq!(store.get_account(1).await.balance(), 0);
        assert_eq!(store.get_account(2).await.balance(), 0);

        let reopened = LedgerStore::open(JsonDir::open(tmp.path()).unwrap()).unwrap();
        assert_eq!(reopened.get_account(1).await.balance(), 0);
    }
}
