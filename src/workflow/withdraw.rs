use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::info;

use super::auth::{AdminPolicy, authorize};
use super::Decision;
use crate::config::WithdrawConfig;
use crate::error::{Currency, LedgerError, RecordKind, ValidationError};
use crate::ledger::{
    Account, Amount, InMemory, LedgerStore, NewWithdraw, Persistence, UserId, WithdrawId, WithdrawMethod,
    WithdrawRequest, WithdrawStatus,
};

/// A validated amount, in PKR and (for Binance) the USD the user typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawQuote {
    pub pkr_amount: Amount,
    pub usd_amount: Option<Decimal>,
}

/// Validates withdraw amounts, opens requests with their principal locked,
/// and applies admin decisions.
pub struct WithdrawWorkflow<P: Persistence = InMemory> {
    store: Arc<LedgerStore<P>>,
    rules: WithdrawConfig,
    admins: Arc<dyn AdminPolicy>,
}

impl<P: Persistence> WithdrawWorkflow<P> {
    pub fn new(store: Arc<LedgerStore<P>>, rules: WithdrawConfig, admins: Arc<dyn AdminPolicy>) -> Self {
        Self {
            store,
            rules,
            admins,
        }
    }

    pub fn rules(&self) -> &WithdrawConfig {
        &self.rules
    }

    /// Parses and bounds-checks an amount typed for `method` against `balance`.
    ///
    /// Binance amounts are USD (at most two decimals) converted with
    /// `pkr_per_usd`, rounding up. Everything else is whole PKR.
    pub fn quote(
        &self,
        method: WithdrawMethod,
        input: &str,
        balance: Amount,
    ) -> Result<WithdrawQuote, ValidationError> {
        let input = input.trim();
        let invalid = || ValidationError::InvalidAmount(input.to_string());

        let quote = match method.currency() {
            Currency::Usd => {
                let usd = Decimal::from_str(input).map_err(|_| invalid())?.normalize();
                if usd <= Decimal::ZERO || usd.scale() > 2 {
                    return Err(invalid());
                }
                if usd < Decimal::from(self.rules.min_usd) {
                    return Err(ValidationError::BelowMinimum {
                        minimum: self.rules.min_usd,
                        currency: Currency::Usd,
                    });
                }
                let pkr = usd
                    .checked_mul(Decimal::from(self.rules.pkr_per_usd))
                    .ok_or_else(invalid)?
                    .ceil()
                    .to_u64()
                    .ok_or_else(invalid)?;
                WithdrawQuote {
                    pkr_amount: pkr,
                    usd_amount: Some(usd),
                }
            }
            Currency::Pkr => {
                let pkr = input.parse::<Amount>().map_err(|_| invalid())?;
                if pkr < self.rules.min_pkr {
                    return Err(ValidationError::BelowMinimum {
                        minimum: self.rules.min_pkr,
                        currency: Currency::Pkr,
                    });
                }
                WithdrawQuote {
                    pkr_amount: pkr,
                    usd_amount: None,
                }
            }
        };

        if quote.pkr_amount > balance {
            return Err(ValidationError::InsufficientBalance {
                required: quote.pkr_amount,
                available: balance,
            });
        }
        Ok(quote)
    }

    /// [`quote`](Self::quote) against the user's current balance.
    pub async fn quote_for(
        &self,
        user: UserId,
        method: WithdrawMethod,
        input: &str,
    ) -> Result<WithdrawQuote, LedgerError> {
        let balance = self.store.get_account(user).await.balance();
        Ok(self.quote(method, input, balance)?)
    }

    /// Creates the pending request and moves its principal balance → hold in
    /// one atomic step. The balance is checked again here; the amount step
    /// may have seen an older one.
    ///
    /// Returns `false` alongside the request when `new.draft_token` had
    /// already produced it.
    pub async fn open(&self, user: UserId, new: NewWithdraw) -> Result<(WithdrawRequest, bool), LedgerError> {
        let (request, created) = self
            .store
            .mutate_account(user, |account| account.add_withdraw(new))
            .await?;
        if created {
            info!(
                user,
                withdraw = request.id,
                method = %request.method,
                pkr = request.pkr_amount,
                "withdraw requested"
            );
        } else {
            info!(user, withdraw = request.id, "withdraw request replayed");
        }
        Ok((request, created))
    }

    pub async fn decide(
        &self,
        actor: UserId,
        decision: Decision,
        user: UserId,
        id: WithdrawId,
    ) -> Result<WithdrawRequest, LedgerError> {
        match decision {
            Decision::Approve => self.approve(actor, user, id).await,
            Decision::Reject => self.reject(actor, user, id).await,
        }
    }

    /// pending → approved: the principal leaves hold and is paid out off-system.
    pub async fn approve(
        &self,
        actor: UserId,
        user: UserId,
        id: WithdrawId,
    ) -> Result<WithdrawRequest, LedgerError> {
        authorize(self.admins.as_ref(), actor)?;
        let request = self
            .resolve(user, id, WithdrawStatus::Approved, |account, amount| {
                account.release(amount)
            })
            .await?;
        info!(user, withdraw = id, pkr = request.pkr_amount, "withdraw approved");
        Ok(request)
    }

    /// pending → rejected: the principal goes back to balance.
    pub async fn reject(
        &self,
        actor: UserId,
        user: UserId,
        id: WithdrawId,
    ) -> Result<WithdrawRequest, LedgerError> {
        authorize(self.admins.as_ref(), actor)?;
        let request = self
            .resolve(user, id, WithdrawStatus::Rejected, |account, amount| {
                account.release_to_balance(amount)
            })
            .await?;
        info!(user, withdraw = id, refunded = request.pkr_amount, "withdraw rejected");
        Ok(request)
    }

    async fn resolve(
        &self,
        user: UserId,
        id: WithdrawId,
        to: WithdrawStatus,
        effect: impl FnOnce(&mut Account, Amount) -> Result<(), LedgerError>,
    ) -> Result<WithdrawRequest, LedgerError> {
        self.store
            .mutate_existing(user, |account| {
                let request = account.update_withdraw_status(id, WithdrawStatus::Pending, to)?;
                effect(account, request.pkr_amount)?;
                Ok(request)
            })
            .await
            .map_err(|e| match e {
                LedgerError::AccountNotFound(_) => LedgerError::NotFound {
                    kind: RecordKind::Withdraw,
                    user,
                    id,
                },
                other => other,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::SingleAdmin;
    use uuid::Uuid;

    const ADMIN: UserId = 1000;

    fn setup() -> (Arc<LedgerStore>, WithdrawWorkflow) {
        let store = Arc::new(LedgerStore::in_memory());
        let flow = WithdrawWorkflow::new(
            Arc::clone(&store),
            WithdrawConfig::default(),
            Arc::new(SingleAdmin(ADMIN)),
        );
        (store, flow)
    }

    fn bank(quote: WithdrawQuote) -> NewWithdraw {
        NewWithdraw {
            method: WithdrawMethod::Bank,
            account_name: "Ali Khan".into(),
            account_number: "PK36SCBL0000001123456702".into(),
            pkr_amount: quote.pkr_amount,
            usd_amount: quote.usd_amount,
            draft_token: Uuid::new_v4(),
        }
    }

    async fn funded(store: &LedgerStore, user: UserId, balance: Amount) {
        store.open_account(user, None).await.unwrap();
        store.mutate_account(user, |a| a.credit(balance)).await.unwrap();
    }

    #[test]
    fn pkr_quote_bounds() {
        let (_, flow) = setup();
        assert_eq!(
            flow.quote(WithdrawMethod::Easypaisa, " 200 ", 250).unwrap(),
            WithdrawQuote {
                pkr_amount: 200,
                usd_amount: None
            }
        );
        assert_eq!(
            flow.quote(WithdrawMethod::Bank, "199", 250).unwrap_err(),
            ValidationError::BelowMinimum {
                minimum: 200,
                currency: Currency::Pkr
            }
        );
        assert_eq!(
            flow.quote(WithdrawMethod::Bank, "300", 250).unwrap_err(),
            ValidationError::InsufficientBalance {
                required: 300,
                available: 250
            }
        );
        assert!(matches!(
            flow.quote(WithdrawMethod::Jazzcash, "two hundred", 250),
            Err(ValidationError::InvalidAmount(_))
        ));
        assert!(matches!(
            flow.quote(WithdrawMethod::Jazzcash, "-5", 250),
            Err(ValidationError::InvalidAmount(_))
        ));
    }

    #[test]
    fn binance_quote_converts_usd() {
        let (_, flow) = setup();
        let q = flow.quote(WithdrawMethod::Binance, "1.5", 1_000).unwrap();
        assert_eq!(q.pkr_amount, 450);
        assert_eq!(q.usd_amount, Some(Decimal::new(15, 1)));

        let q = flow.quote(WithdrawMethod::Binance, "1.01", 1_000).unwrap();
        assert_eq!(q.pkr_amount, 303);
    }

    #[test]
    fn binance_quote_ignores_trailing_zeros() {
        let (_, flow) = setup();
        let q = flow.quote(WithdrawMethod::Binance, "1.500", 1_000).unwrap();
        assert_eq!(q.pkr_amount, 450);
        assert_eq!(q.usd_amount, Some(Decimal::new(15, 1)));

        assert!(matches!(
            flow.quote(WithdrawMethod::Binance, "1.505", 1_000),
            Err(ValidationError::InvalidAmount(_))
        ));
    }

    #[test]
    fn huge_binance_amount_is_invalid_not_a_panic() {
        let (_, flow) = setup();
        assert!(matches!(
            flow.quote(WithdrawMethod::Binance, "1000000000000000000000000000", 1_000),
            Err(ValidationError::InvalidAmount(_))
        ));
        assert!(matches!(
            flow.quote(WithdrawMethod::Binance, "79228162514264337593543950335", u64::MAX),
            Err(ValidationError::InvalidAmount(_))
        ));
    }

    #[test]
    fn binance_quote_refuses_bad_amounts() {
        let (_, flow) = setup();
        assert_eq!(
            flow.quote(WithdrawMethod::Binance, "1", 50).unwrap_err(),
            ValidationError::InsufficientBalance {
                required: 300,
                available: 50
            }
        );
        assert_eq!(
            flow.quote(WithdrawMethod::Binance, "0.5", 1_000).unwrap_err(),
            ValidationError::BelowMinimum {
                minimum: 1,
                currency: Currency::Usd
            }
        );
        assert!(matches!(
            flow.quote(WithdrawMethod::Binance, "1.005", 1_000),
            Err(ValidationError::InvalidAmount(_))
        ));
        assert!(matches!(
            flow.quote(WithdrawMethod::Binance, "abc", 1_000),
            Err(ValidationError::InvalidAmount(_))
        ));
    }

    #[tokio::test]
    async fn open_then_reject_refunds() {
        let (store, flow) = setup();
        funded(&store, 1, 250).await;

        let quote = flow.quote_for(1, WithdrawMethod::Bank, "200").await.unwrap();
        let (req, created) = flow.open(1, bank(quote)).await.unwrap();
        assert!(created);
        assert_eq!(req.status, WithdrawStatus::Pending);
        let acct = store.get_account(1).await;
        assert_eq!((acct.balance(), acct.hold()), (50, 200));

        let req = flow.reject(ADMIN, 1, req.id).await.unwrap();
        assert_eq!(req.status, WithdrawStatus::Rejected);
        let acct = store.get_account(1).await;
        assert_eq!((acct.balance(), acct.hold()), (250, 0));
    }

    #[tokio::test]
    async fn open_then_approve_pays_out_from_hold() {
        let (store, flow) = setup();
        funded(&store, 1, 250).await;

        let quote = flow.quote_for(1, WithdrawMethod::Bank, "200").await.unwrap();
        let (req, _) = flow.open(1, bank(quote)).await.unwrap();
        flow.approve(ADMIN, 1, req.id).await.unwrap();

        let acct = store.get_account(1).await;
        assert_eq!((acct.balance(), acct.hold()), (50, 0));
        assert_eq!(acct.withdraw(req.id).unwrap().status, WithdrawStatus::Approved);
    }

    #[tokio::test]
    async fn second_decision_does_not_move_money() {
        let (store, flow) = setup();
        funded(&store, 1, 250).await;
        let quote = flow.quote_for(1, WithdrawMethod::Bank, "200").await.unwrap();
        let (req, _) = flow.open(1, bank(quote)).await.unwrap();
        flow.reject(ADMIN, 1, req.id).await.unwrap();

        for decision in [Decision::Reject, Decision::Approve] {
            let err = flow.decide(ADMIN, decision, 1, req.id).await.unwrap_err();
            assert!(matches!(err, LedgerError::AlreadyProcessed { .. }));
        }
        let acct = store.get_account(1).await;
        assert_eq!((acct.balance(), acct.hold()), (250, 0));
    }

    #[tokio::test]
    async fn open_rechecks_balance() {
        let (store, flow) = setup();
        funded(&store, 1, 250).await;
        let quote = flow.quote_for(1, WithdrawMethod::Bank, "200").await.unwrap();

        // Balance drops between the amount step and the final step.
        store
            .mutate_account(1, |a| {
                a.lock(100)?;
                a.release(100)
            })
            .await
            .unwrap();

        let err = flow.open(1, bank(quote)).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Validation(ValidationError::InsufficientBalance {
                required: 200,
                available: 150
            })
        ));
        let acct = store.get_account(1).await;
        assert_eq!((acct.balance(), acct.hold()), (150, 0));
        assert_eq!(acct.withdraws().count(), 0);
    }

    #[tokio::test]
    async fn replayed_token_does_not_debit_twice() {
        let (store, flow) = setup();
        funded(&store, 1, 500).await;
        let quote = flow.quote_for(1, WithdrawMethod::Bank, "200").await.unwrap();
        let new = bank(quote);

        flow.open(1, new.clone()).await.unwrap();
        let (_, created) = flow.open(1, new).await.unwrap();
        assert!(!created);
        let acct = store.get_account(1).await;
        assert_eq!((acct.balance(), acct.hold()), (300, 200));
    }

    #[tokio::test]
    async fn unknown_withdraw_is_not_found() {
        let (store, flow) = setup();
        funded(&store, 1, 500).await;
        let err = flow.approve(ADMIN, 1, 42).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { kind: RecordKind::Withdraw, id: 42, .. }));
        let err = flow.reject(ADMIN, 404, 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { user: 404, .. }));
    }

    #[tokio::test]
    async fn non_admin_cannot_decide() {
        let (store, flow) = setup();
        funded(&store, 1, 250).await;
        let quote = flow.quote_for(1, WithdrawMethod::Bank, "200").await.unwrap();
        let (req, _) = flow.open(1, bank(quote)).await.unwrap();

        let err = flow.reject(1, 1, req.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized(1)));
        let acct = store.get_account(1).await;
        assert_eq!((acct.balance(), acct.hold()), (50, 200));
    }
}
