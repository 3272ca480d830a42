//! Challenge issuer, receipt verifier, and payment decision state machine
//! (C9–C11 / §4.8–§4.10).

pub mod api_key;
pub mod challenge;
pub mod credit_note;
pub mod decision;
pub mod oracle;
pub mod verifier;

pub use api_key::{compute_cost_micro, ApiKeyStore, PriceEntry, PricingTable, ValidatedApiKey};
pub use challenge::{BindingInput, Challenge, ChallengeEnvelope, ChallengeIssuer, CHALLENGE_TTL_SECS};
pub use credit_note::{CreditNoteBook, IssueOutcome, CREDIT_NOTE_TTL_SECS, MAX_SAFE_INTEGER};
pub use decision::{DecisionError, IncomingRequest, PaymentDecision, PaymentDecisionEngine};
pub use oracle::{SettlementOracle, SettlementOutcome, SettlementQuery, SettlementRecord};
pub use verifier::{PresentedReceipt, ReceiptVerifier, VerificationFailure, VerifiedReceipt};
