use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use inflow_payments::{
    GatewayError, IntentRequest, IntentStatus, LinkRequest, PaymentGateway, PaymentIntent,
    PaymentLink,
};

/// What the next gateway call answers with.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedOutcome {
    Succeed,
    RequireConfirmation,
    RequireAction(Value),
    Status(IntentStatus),
    Fail(GatewayError),
}

#[derive(Debug, Default)]
struct State {
    script: VecDeque<ScriptedOutcome>,
    intents: HashMap<String, PaymentIntent>,
    requests: Vec<IntentRequest>,
    links: Vec<LinkRequest>,
    next_id: u64,
}

/// In-process gateway. Every create and confirm call pops the next scripted
/// outcome; an empty script succeeds.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    state: Mutex<State>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, outcome: ScriptedOutcome) {
        if let Ok(mut state) = self.state.lock() {
            state.script.push_back(outcome);
        }
    }

    /// Moves an existing intent to `status`, as a 3-D Secure completion would.
    pub fn settle_out_of_band(&self, intent_id: &str, status: IntentStatus) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(intent) = state.intents.get_mut(intent_id) {
                intent.status = status;
                intent.next_action = None;
            }
        }
    }

    pub fn intent_requests(&self) -> Vec<IntentRequest> {
        self.state.lock().map(|s| s.requests.clone()).unwrap_or_default()
    }

    pub fn link_requests(&self) -> Vec<LinkRequest> {
        self.state.lock().map(|s| s.links.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, GatewayError> {
        self.state
            .lock()
            .map_err(|_| GatewayError::Transport("scripted gateway poisoned".into()))
    }
}

fn apply(intent: &mut PaymentIntent, outcome: ScriptedOutcome) -> Result<(), GatewayError> {
    match outcome {
        ScriptedOutcome::Succeed => {
            intent.status = IntentStatus::Succeeded;
            intent.next_action = None;
        }
        ScriptedOutcome::RequireConfirmation => intent.status = IntentStatus::RequiresConfirmation,
        ScriptedOutcome::RequireAction(next_action) => {
            intent.status = IntentStatus::RequiresAction;
            intent.next_action = Some(next_action);
        }
        ScriptedOutcome::Status(status) => intent.status = status,
        ScriptedOutcome::Fail(err) => return Err(err),
    }
    Ok(())
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_payment_intent(&self, request: IntentRequest) -> Result<PaymentIntent, GatewayError> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let id = format!("pi_scripted_{}", state.next_id);
        let mut intent = PaymentIntent {
            id: id.clone(),
            status: IntentStatus::RequiresPaymentMethod,
            amount: request.amount,
            currency: request.currency,
            client_secret: Some(format!("{id}_secret")),
            next_action: None,
        };
        let outcome = state.script.pop_front().unwrap_or(ScriptedOutcome::Succeed);
        state.requests.push(request);
        apply(&mut intent, outcome)?;
        state.intents.insert(id, intent.clone());
        Ok(intent)
    }

    async fn confirm_payment_intent(
        &self,
        intent_id: &str,
        _return_url: &str,
    ) -> Result<PaymentIntent, GatewayError> {
        let mut state = self.lock()?;
        let outcome = state.script.pop_front().unwrap_or(ScriptedOutcome::Succeed);
        let intent = state
            .intents
            .get_mut(intent_id)
            .ok_or_else(|| GatewayError::UnknownIntent(intent_id.to_string()))?;
        apply(intent, outcome)?;
        Ok(intent.clone())
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        self.lock()?
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownIntent(intent_id.to_string()))
    }

    async fn create_payment_link(&self, request: LinkRequest) -> Result<PaymentLink, GatewayError> {
        let mut state = self.lock()?;
        if request.line_items.is_empty() {
            return Err(GatewayError::Rejected("payment link needs at least one line item".into()));
        }
        state.next_id += 1;
        let id = format!("plink_scripted_{}", state.next_id);
        state.links.push(request);
        Ok(PaymentLink {
            url: format!("https://pay.scripted.test/{id}"),
            id,
        })
    }
}
