//! Send/swap session orchestration
//!
//! Owns one `FlowState` and drives it through the collaborators. Every async
//! result is applied only if the session generation it started under is still
//! current; `start`, `back`, and `reset` move to a new generation, so
//! responses belonging to an abandoned flow are discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::recipient::RecipientResolver;
use super::state::{
    transition, EnteredAmount, FlowAsset, FlowError, FlowEvent, FlowState, SendOrder, Step,
    SwapTarget,
};
use crate::config::SwapSettings;
use crate::core::{format_units, parse_units, Chain, TokenHolding, WRAPPED_SOL_MINT};
use crate::execution::{
    FeeSource, TransactionReceipt, TransactionSubmitter, TransferBuilder, UnsignedTransaction,
    WalletSigner,
};
use crate::notify::NotificationDispatcher;
use crate::portfolio::BalanceAggregator;
use crate::trading::{QuoteRequest, QuoteSource, SwapQuote};

/// Collaborators injected into every session
#[derive(Clone)]
pub struct FlowServices {
    pub fees: Arc<dyn FeeSource>,
    pub quotes: Arc<dyn QuoteSource>,
    pub transfers: Arc<dyn TransferBuilder>,
    pub submitter: Arc<TransactionSubmitter>,
    pub signer: Arc<dyn WalletSigner>,
    pub resolver: Arc<dyn RecipientResolver>,
    pub swap: SwapSettings,
    /// Invalidated after a confirmed transaction
    pub balances: Option<Arc<BalanceAggregator>>,
    pub notifier: Option<NotificationDispatcher>,
}

#[derive(Default)]
struct Session {
    generation: u64,
    state: FlowState,
}

/// Clears the in-flight flag even if the submit future is dropped
struct SubmitGuard<'a>(&'a AtomicBool);

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SendFlowController {
    services: FlowServices,
    session: RwLock<Session>,
    submitting: AtomicBool,
}

impl SendFlowController {
    pub fn new(services: FlowServices) -> Self {
        Self {
            services,
            session: RwLock::new(Session::default()),
            submitting: AtomicBool::new(false),
        }
    }

    pub async fn state(&self) -> FlowState {
        self.session.read().await.state.clone()
    }

    pub async fn step(&self) -> Option<Step> {
        self.session.read().await.state.step()
    }

    /// Apply and invalidate every in-flight response
    async fn restart(&self, event: FlowEvent) -> Result<FlowState, FlowError> {
        let mut session = self.session.write().await;
        session.state = transition(&session.state, event)?;
        session.generation += 1;
        Ok(session.state.clone())
    }

    async fn apply_if_current(&self, generation: u64, event: FlowEvent) -> Result<FlowState, FlowError> {
        let mut session = self.session.write().await;
        if session.generation != generation {
            debug!(generation, current = session.generation, "Discarding stale response");
            return Err(FlowError::Stale);
        }
        session.state = transition(&session.state, event)?;
        Ok(session.state.clone())
    }

    pub async fn open_assets(&self) -> Result<FlowState, FlowError> {
        self.restart(FlowEvent::OpenAssets).await
    }

    pub async fn close_assets(&self) -> Result<FlowState, FlowError> {
        self.restart(FlowEvent::CloseAssets).await
    }

    /// Begin sending `asset` on its own chain
    pub async fn start(&self, asset: FlowAsset) -> Result<FlowState, FlowError> {
        self.restart(FlowEvent::Start(SendOrder::send(asset))).await
    }

    /// Begin swapping `token` into `target`. Swaps route through Jupiter and
    /// are Solana-only.
    pub async fn start_swap(&self, token: TokenHolding, target: SwapTarget) -> Result<FlowState, FlowError> {
        if token.chain != Chain::Solana {
            return Err(FlowError::UnsupportedSwap(token.chain.to_string()));
        }
        self.restart(FlowEvent::Start(SendOrder::swap(token, target))).await
    }

    #[instrument(skip(self))]
    pub async fn confirm_amount(&self, amount: &str, is_usd: bool) -> Result<FlowState, FlowError> {
        let mut session = self.session.write().await;
        let entered = match &session.state {
            FlowState::Amount { order } => EnteredAmount::resolve(&order.asset, amount, is_usd)?,
            other => return Err(other.reject("confirm amount")),
        };
        debug!(token_amount = %entered.token_amount, "Amount confirmed");

        session.state = transition(&session.state, FlowEvent::ConfirmAmount(entered))?;
        Ok(session.state.clone())
    }

    /// Resolve `input`, then price the transaction (fee, and a quote for
    /// swaps) before moving to confirmation
    #[instrument(skip(self))]
    pub async fn select_recipient(&self, input: &str) -> Result<FlowState, FlowError> {
        let (generation, order, amount) = {
            let session = self.session.read().await;
            match &session.state {
                FlowState::Recipient { order, amount } => {
                    (session.generation, order.clone(), amount.clone())
                }
                other => return Err(other.reject("select recipient")),
            }
        };

        let family = order.network.family();
        let recipient = self
            .services
            .resolver
            .resolve(input, family)
            .await
            .map_err(|e| FlowError::UnresolvedRecipient(e.to_string()))?;

        if order.is_swap() && self.services.signer.address(family).as_deref() != Some(recipient.address.as_str()) {
            return Err(FlowError::SwapRecipientMismatch);
        }

        let (network_fee, quote) = tokio::join!(self.services.fees.estimate(order.network), async {
            match order.is_swap() {
                true => self.fetch_quote(&order, &amount).await.map(Some),
                false => Ok(None),
            }
        });
        let quote = quote?;

        self.apply_if_current(
            generation,
            FlowEvent::SelectRecipient {
                recipient,
                network_fee,
                quote,
            },
        )
        .await
    }

    /// Re-price a swap on the confirmation step
    #[instrument(skip(self))]
    pub async fn refresh_quote(&self) -> Result<FlowState, FlowError> {
        let (generation, order, amount) = {
            let session = self.session.read().await;
            match &session.state {
                FlowState::Confirm { order, amount, .. } if order.is_swap() => {
                    (session.generation, order.clone(), amount.clone())
                }
                other => return Err(other.reject("update quote")),
            }
        };

        let quote = self.fetch_quote(&order, &amount).await?;
        self.apply_if_current(generation, FlowEvent::QuoteUpdated(quote)).await
    }

    async fn fetch_quote(&self, order: &SendOrder, amount: &EnteredAmount) -> Result<SwapQuote, FlowError> {
        let (FlowAsset::Token(token), Some(target)) = (&order.asset, &order.swap_target) else {
            return Err(FlowError::UnsupportedSwap(order.asset.symbol().to_string()));
        };

        let input_mint = token
            .contract_address
            .clone()
            .unwrap_or_else(|| WRAPPED_SOL_MINT.to_string());
        let raw = parse_units(&amount.token_amount, token.decimals)?;

        let mut request = QuoteRequest::new(
            input_mint,
            target.output_mint.clone(),
            raw.to_string(),
            self.services.swap.slippage_bps,
        );
        request.platform_fee_bps = self
            .services
            .swap
            .fee_account
            .as_ref()
            .map(|_| self.services.swap.platform_fee_bps);

        Ok(self.services.quotes.get_quote(&request).await?)
    }

    /// Build, sign, broadcast, and confirm. On failure the session stays on
    /// the confirmation step with everything entered so far.
    #[instrument(skip(self))]
    pub async fn confirm_and_submit(&self) -> Result<TransactionReceipt, FlowError> {
        let (generation, order, amount, recipient) = {
            let session = self.session.read().await;
            match &session.state {
                FlowState::Confirm {
                    order,
                    amount,
                    recipient,
                    ..
                } => (
                    session.generation,
                    order.clone(),
                    amount.clone(),
                    recipient.clone(),
                ),
                other => return Err(other.reject("submit")),
            }
        };

        if self.submitting.swap(true, Ordering::SeqCst) {
            return Err(FlowError::SubmissionInProgress);
        }
        let _guard = SubmitGuard(&self.submitting);

        let (receipt, swapped_out) = match self.execute(&order, &amount, &recipient.address).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    error = %e,
                    signature = ?e.failed_receipt().map(|r| r.signature.as_str()),
                    "Submission failed, staying on confirmation"
                );
                return Err(e);
            }
        };

        match self
            .apply_if_current(
                generation,
                FlowEvent::Submitted {
                    hash: receipt.signature.clone(),
                },
            )
            .await
        {
            Ok(_) => info!(signature = %receipt.signature, "Flow completed"),
            Err(e) => warn!(error = %e, signature = %receipt.signature, "Transaction confirmed after the flow moved on"),
        }

        self.after_success(&order, &amount, &recipient.address, swapped_out);
        Ok(receipt)
    }

    async fn execute(
        &self,
        order: &SendOrder,
        amount: &EnteredAmount,
        recipient: &str,
    ) -> Result<(TransactionReceipt, Option<String>), FlowError> {
        let from = self
            .services
            .signer
            .address(order.network.family())
            .ok_or(FlowError::NoSigner(order.network))?;

        let (unsigned, swapped_out) = match (&order.asset, &order.swap_target) {
            (FlowAsset::Token(_), Some(target)) => {
                // Quotes go stale quickly; never build from the displayed one
                let quote = self.fetch_quote(order, amount).await?;
                let payload = self
                    .services
                    .quotes
                    .get_swap_transaction(&quote, &from, self.services.swap.fee_account.as_deref())
                    .await?;

                let out = quote
                    .out_amount
                    .parse::<u128>()
                    .ok()
                    .and_then(|raw| format_units(raw, target.decimals).ok())
                    .unwrap_or_else(|| quote.out_amount.clone());
                (UnsignedTransaction::Solana { payload }, Some(out))
            }
            (FlowAsset::Token(token), None) => {
                let unsigned = self
                    .services
                    .transfers
                    .build_token_transfer(token, &from, recipient, &amount.token_amount)
                    .await?;
                (unsigned, None)
            }
            (FlowAsset::Nft(nft), _) => {
                let quantity = amount.token_amount.parse::<u64>().unwrap_or(1);
                let unsigned = self
                    .services
                    .transfers
                    .build_nft_transfer(nft, &from, recipient, quantity)
                    .await?;
                (unsigned, None)
            }
        };

        let receipt = self
            .services
            .submitter
            .submit(unsigned, self.services.signer.as_ref())
            .await?;
        Ok((receipt, swapped_out))
    }

    fn after_success(&self, order: &SendOrder, amount: &EnteredAmount, recipient: &str, swapped_out: Option<String>) {
        if let Some(balances) = &self.services.balances {
            balances.invalidate_all();
        }

        let Some(notifier) = &self.services.notifier else {
            return;
        };
        match (&order.swap_target, swapped_out) {
            (Some(target), Some(out)) => {
                notifier.notify_swap_completed(&amount.token_amount, order.asset.symbol(), &out, &target.symbol);
            }
            _ => {
                notifier.notify_token_received(&amount.token_amount, order.asset.symbol(), recipient);
            }
        }
    }

    pub async fn back(&self, step: Step) -> Result<FlowState, FlowError> {
        self.restart(FlowEvent::Back(step)).await
    }

    /// Close the flow, discarding all transient state and pending responses
    pub async fn reset(&self) {
        let mut session = self.session.write().await;
        session.state = FlowState::Idle;
        session.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{NftHolding, NftStandard, Recipient};
    use crate::execution::progress::testing::RecordingProgress;
    use crate::execution::submitter::testing::{FakeSigner, FakeTransport};
    use crate::execution::transfer::{solana_native_transfer, EvmTransactionRequest, TransferError};
    use crate::execution::{ReceiptStatus, SubmitError, SubmitErrorKind};
    use crate::flow::recipient::AddressResolver;
    use crate::trading::QuoteError;
    use async_trait::async_trait;
    use solana_sdk::{hash::Hash, pubkey::Pubkey};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    const EVM_RECIPIENT: &str = "0x2222222222222222222222222222222222222222";

    struct FixedFee;

    #[async_trait]
    impl FeeSource for FixedFee {
        async fn estimate(&self, chain: Chain) -> String {
            match chain {
                Chain::Solana => "0.000005".to_string(),
                _ => "0.0001".to_string(),
            }
        }
    }

    #[derive(Default)]
    struct FakeQuotes {
        calls: AtomicUsize,
        error: Mutex<Option<QuoteError>>,
        /// When set, quote requests wait for it before answering
        gate: Option<Arc<Notify>>,
    }

    fn quote_json(out_amount: &str) -> serde_json::Value {
        serde_json::json!({
            "inputMint": WRAPPED_SOL_MINT,
            "outputMint": "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
            "inAmount": "1000000000",
            "outAmount": out_amount,
            "priceImpactPct": "0.001",
            "routePlan": []
        })
    }

    #[async_trait]
    impl QuoteSource for FakeQuotes {
        async fn get_quote(&self, _request: &QuoteRequest) -> Result<SwapQuote, QuoteError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(err) = self.error.lock().unwrap().clone() {
                return Err(err);
            }
            SwapQuote::from_response(quote_json(&format!("{}000000", 150 + n)))
        }

        async fn get_swap_transaction(
            &self,
            _quote: &SwapQuote,
            user_public_key: &str,
            _fee_account: Option<&str>,
        ) -> Result<Vec<u8>, QuoteError> {
            let payer: Pubkey = user_public_key.parse().map_err(|_| QuoteError::EmptyQuote)?;
            solana_native_transfer(&payer, &Pubkey::new_unique(), 1, Hash::new_unique())
                .map_err(|e| QuoteError::InvalidSwapTransaction(e.to_string()))
        }
    }

    struct FakeTransfers;

    #[async_trait]
    impl TransferBuilder for FakeTransfers {
        async fn build_token_transfer(
            &self,
            token: &TokenHolding,
            from: &str,
            to: &str,
            amount: &str,
        ) -> Result<UnsignedTransaction, TransferError> {
            Ok(UnsignedTransaction::Evm(EvmTransactionRequest {
                chain: token.chain,
                chain_id: 8453,
                from: from.to_string(),
                to: to.to_string(),
                value: parse_units(amount, token.decimals)?.to_string(),
                data: "0x".to_string(),
            }))
        }

        async fn build_nft_transfer(
            &self,
            nft: &NftHolding,
            from: &str,
            to: &str,
            quantity: u64,
        ) -> Result<UnsignedTransaction, TransferError> {
            Ok(UnsignedTransaction::Evm(EvmTransactionRequest {
                chain: nft.chain,
                chain_id: 8453,
                from: from.to_string(),
                to: to.to_string(),
                value: "0".to_string(),
                data: format!("0x{:02x}", quantity),
            }))
        }
    }

    struct Harness {
        controller: Arc<SendFlowController>,
        quotes: Arc<FakeQuotes>,
        transport: Arc<FakeTransport>,
        progress: Arc<RecordingProgress>,
    }

    fn harness(quotes: FakeQuotes, transport: FakeTransport) -> Harness {
        let quotes = Arc::new(quotes);
        let transport = Arc::new(transport);
        let progress = Arc::new(RecordingProgress::default());
        let submitter = Arc::new(TransactionSubmitter::new(
            transport.clone(),
            transport.clone(),
            progress.clone(),
        ));

        let services = FlowServices {
            fees: Arc::new(FixedFee),
            quotes: quotes.clone(),
            transfers: Arc::new(FakeTransfers),
            submitter,
            signer: Arc::new(FakeSigner::default()),
            resolver: Arc::new(AddressResolver),
            swap: SwapSettings::default(),
            balances: None,
            notifier: None,
        };

        Harness {
            controller: Arc::new(SendFlowController::new(services)),
            quotes,
            transport,
            progress,
        }
    }

    fn base_eth(market_price: f64) -> TokenHolding {
        TokenHolding::new(
            Chain::Base,
            None,
            "ETH",
            "Ether",
            18,
            "2000000000000000000",
            None,
            market_price,
            0.0,
        )
    }

    fn sol() -> TokenHolding {
        TokenHolding::new(Chain::Solana, None, "SOL", "Solana", 9, "5000000000", None, 150.0, 0.0)
    }

    fn usdc_target() -> SwapTarget {
        SwapTarget {
            output_mint: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string(),
            symbol: "USDC".to_string(),
            decimals: 6,
        }
    }

    async fn swap_on_confirm(h: &Harness) {
        h.controller.start_swap(sol(), usdc_target()).await.unwrap();
        h.controller.confirm_amount("1", false).await.unwrap();
        let own = FakeSigner::default().solana_address;
        h.controller.select_recipient(&own).await.unwrap();
    }

    #[tokio::test]
    async fn test_usd_amount_with_zero_price_is_rejected() {
        let h = harness(FakeQuotes::default(), FakeTransport::default());
        h.controller.start(FlowAsset::Token(base_eth(0.0))).await.unwrap();
        let before = h.controller.state().await;

        let err = h.controller.confirm_amount("100", true).await.unwrap_err();
        assert_eq!(err, FlowError::ZeroPrice);
        assert_eq!(h.controller.state().await, before);
    }

    #[tokio::test]
    async fn test_select_recipient_on_amount_step_fails_without_mutation() {
        let h = harness(FakeQuotes::default(), FakeTransport::default());
        h.controller.start(FlowAsset::Token(base_eth(2000.0))).await.unwrap();
        let before = h.controller.state().await;

        let err = h.controller.select_recipient(EVM_RECIPIENT).await.unwrap_err();
        assert!(matches!(err, FlowError::InvalidTransition { from: "amount", .. }));
        assert_eq!(h.controller.state().await, before);
    }

    #[tokio::test]
    async fn test_send_happy_path() {
        let h = harness(FakeQuotes::default(), FakeTransport::default());
        h.controller.start(FlowAsset::Token(base_eth(2000.0))).await.unwrap();

        let state = h.controller.confirm_amount("100", true).await.unwrap();
        let FlowState::Recipient { amount, .. } = &state else {
            panic!("expected recipient step");
        };
        assert_eq!(amount.token_amount, "0.05");

        let state = h.controller.select_recipient(EVM_RECIPIENT).await.unwrap();
        let FlowState::Confirm { network_fee, quote, recipient, .. } = &state else {
            panic!("expected confirm step");
        };
        assert_eq!(network_fee, "0.0001");
        assert!(quote.is_none());
        assert_eq!(recipient, &Recipient::address(EVM_RECIPIENT));

        let receipt = h.controller.confirm_and_submit().await.unwrap();
        assert_eq!(receipt.signature, "sig1");
        assert_eq!(h.controller.state().await.hash(), Some("sig1"));
        assert_eq!(h.transport.broadcasts.lock().unwrap().len(), 1);
        assert!(h.progress.dangling().is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_recipient_blocks_advance() {
        let h = harness(FakeQuotes::default(), FakeTransport::default());
        h.controller.start(FlowAsset::Token(base_eth(2000.0))).await.unwrap();
        h.controller.confirm_amount("0.1", false).await.unwrap();

        let err = h.controller.select_recipient("friend.eth").await.unwrap_err();
        assert!(matches!(err, FlowError::UnresolvedRecipient(_)));
        assert_eq!(h.controller.step().await, Some(Step::Recipient));
    }

    #[tokio::test]
    async fn test_failed_submission_stays_on_confirm() {
        let transport = FakeTransport {
            confirm_error: Some("insufficient funds for gas * price + value".to_string()),
            ..Default::default()
        };
        let h = harness(FakeQuotes::default(), transport);
        h.controller.start(FlowAsset::Token(base_eth(2000.0))).await.unwrap();
        h.controller.confirm_amount("0.5", false).await.unwrap();
        let confirm = h.controller.select_recipient(EVM_RECIPIENT).await.unwrap();

        let err = h.controller.confirm_and_submit().await.unwrap_err();
        let FlowError::Submit(failure) = &err else {
            panic!("expected a submission failure, got {err:?}");
        };
        assert_eq!(failure.error, SubmitError::InsufficientFunds);
        assert_eq!(err.to_string(), "Insufficient funds to complete this transaction.");

        let receipt = err.failed_receipt().unwrap();
        assert_eq!(receipt.signature, "sig1");
        assert_eq!(receipt.status, ReceiptStatus::Failed);
        assert_eq!(receipt.error_kind, Some(SubmitErrorKind::InsufficientFunds));
        assert_eq!(h.controller.state().await, confirm);
        assert!(h.progress.dangling().is_empty());
    }

    #[tokio::test]
    async fn test_nft_send() {
        let h = harness(FakeQuotes::default(), FakeTransport::default());
        let nft = NftHolding {
            chain: Chain::Base,
            contract_address: "0x3333333333333333333333333333333333333333".to_string(),
            token_id: "5".to_string(),
            standard: NftStandard::Erc1155,
            name: "Pass".to_string(),
            image: "x".to_string(),
            collection_key: None,
            is_spam: false,
        };
        h.controller.start(FlowAsset::Nft(nft)).await.unwrap();
        assert_eq!(
            h.controller.confirm_amount("1", true).await.unwrap_err(),
            FlowError::UsdNotSupported
        );
        h.controller.confirm_amount("3", false).await.unwrap();
        h.controller.select_recipient(EVM_RECIPIENT).await.unwrap();
        h.controller.confirm_and_submit().await.unwrap();

        let broadcasts = h.transport.broadcasts.lock().unwrap();
        assert_eq!(broadcasts[0], b"0x03".to_vec());
    }

    #[tokio::test]
    async fn test_swap_refetches_quote_at_submit() {
        let h = harness(FakeQuotes::default(), FakeTransport::default());
        swap_on_confirm(&h).await;

        let FlowState::Confirm { quote: Some(quote), .. } = h.controller.state().await else {
            panic!("expected a quote on confirm");
        };
        assert_eq!(quote.out_amount, "151000000");

        let receipt = h.controller.confirm_and_submit().await.unwrap();
        assert_eq!(h.quotes.calls.load(Ordering::SeqCst), 2);
        assert_eq!(receipt.chain, Chain::Solana);
        assert_eq!(h.controller.step().await, Some(Step::Success));
    }

    #[tokio::test]
    async fn test_swap_requires_own_wallet_as_recipient() {
        let h = harness(FakeQuotes::default(), FakeTransport::default());
        h.controller.start_swap(sol(), usdc_target()).await.unwrap();
        h.controller.confirm_amount("1", false).await.unwrap();

        let other = Pubkey::new_unique().to_string();
        assert_eq!(
            h.controller.select_recipient(&other).await.unwrap_err(),
            FlowError::SwapRecipientMismatch
        );
    }

    #[tokio::test]
    async fn test_swap_is_solana_only() {
        let h = harness(FakeQuotes::default(), FakeTransport::default());
        let err = h.controller.start_swap(base_eth(2000.0), usdc_target()).await.unwrap_err();
        assert_eq!(err, FlowError::UnsupportedSwap("BASE".to_string()));
        assert_eq!(h.controller.step().await, None);
    }

    #[tokio::test]
    async fn test_quote_error_is_surfaced() {
        let quotes = FakeQuotes::default();
        *quotes.error.lock().unwrap() = Some(QuoteError::ServiceBusy);
        let h = harness(quotes, FakeTransport::default());
        h.controller.start_swap(sol(), usdc_target()).await.unwrap();
        h.controller.confirm_amount("1", false).await.unwrap();

        let own = FakeSigner::default().solana_address;
        let err = h.controller.select_recipient(&own).await.unwrap_err();
        assert_eq!(err.to_string(), "Service is busy. Please wait a moment and try again.");
        assert_eq!(h.controller.step().await, Some(Step::Recipient));
    }

    #[tokio::test]
    async fn test_late_quote_after_reset_is_discarded() {
        let gate = Arc::new(Notify::new());
        let h = harness(
            FakeQuotes {
                gate: Some(gate.clone()),
                ..Default::default()
            },
            FakeTransport::default(),
        );

        // Let the initial quote through, then hold the refresh
        gate.notify_one();
        swap_on_confirm(&h).await;

        let controller = h.controller.clone();
        let pending = tokio::spawn(async move { controller.refresh_quote().await });

        while h.quotes.calls.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        h.controller.reset().await;
        gate.notify_one();

        let result = pending.await.unwrap();
        assert_eq!(result.unwrap_err(), FlowError::Stale);
        assert_eq!(h.controller.state().await, FlowState::Idle);
    }

    #[tokio::test]
    async fn test_back_then_forward_again() {
        let h = harness(FakeQuotes::default(), FakeTransport::default());
        h.controller.start(FlowAsset::Token(base_eth(2000.0))).await.unwrap();
        h.controller.confirm_amount("0.1", false).await.unwrap();
        h.controller.select_recipient(EVM_RECIPIENT).await.unwrap();

        let state = h.controller.back(Step::Amount).await.unwrap();
        assert_eq!(state.step(), Some(Step::Amount));
        assert!(h.controller.confirm_and_submit().await.is_err());

        h.controller.confirm_amount("0.2", false).await.unwrap();
        let state = h.controller.select_recipient(EVM_RECIPIENT).await.unwrap();
        let FlowState::Confirm { amount, .. } = state else {
            panic!("expected confirm step");
        };
        assert_eq!(amount.token_amount, "0.2");
    }
}
