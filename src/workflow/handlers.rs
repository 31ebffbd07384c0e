//! Stage logic applied to a session between checkpoints
//!
//! These functions only mutate the session value they are given. The engine
//! decides the next state and commits.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::analysis::classify::ClassifierConfig;
use crate::analysis::risk;
use crate::models::{AnalysisResult, ApprovalDecision, DeliveryRecord, DiscardedSetup, Session};

/// Store the scheduler's results, replacing any earlier scan
pub fn record_scan(session: &mut Session, mut results: Vec<AnalysisResult>) {
    results.sort_by(|a, b| a.instrument.cmp(&b.instrument));
    session.results = results;
}

/// Route every candidate to its kind's risk rule.
///
/// Candidates a rule cannot price are discarded with the rule's reason.
pub fn assess_candidates(session: &mut Session, config: &ClassifierConfig) {
    let mut setups = Vec::new();
    let mut discarded = Vec::new();

    for result in &session.results {
        for candidate in &result.candidates {
            match risk::assess(candidate, &session.id, config, result.analyzed_at) {
                Ok(setup) => setups.push(setup),
                Err(reason) => {
                    debug!(
                        session_id = %session.id,
                        symbol = %candidate.symbol,
                        kind = %candidate.kind,
                        reason = %reason,
                        "Risk: candidate discarded"
                    );
                    discarded.push(DiscardedSetup::unpriced(candidate, reason));
                }
            }
        }
    }

    session.setups = setups;
    session.discarded = discarded;
}

/// Apply the risk/reward threshold. Returns the number of setups that passed.
pub fn screen_setups(
    session: &mut Session,
    min_risk_reward: f64,
    approval_deadline: DateTime<Utc>,
) -> usize {
    let (passed, rejected) = risk::screen(&session.setups, min_risk_reward);
    session.pending = passed;
    session.discarded.extend(rejected);

    if session.pending.is_empty() {
        session.approval_deadline = None;
        session.reason = Some(if session.setups.is_empty() {
            format!(
                "no setups detected across {} instruments ({} failed)",
                session.instruments.len(),
                session.failed_instruments()
            )
        } else {
            format!(
                "no setup met the minimum risk/reward of {:.2}",
                min_risk_reward
            )
        });
    } else {
        session.approval_deadline = Some(approval_deadline);
    }
    session.pending.len()
}

/// Record an approval decision and the setups it approved
pub fn apply_decision(session: &mut Session, decision: ApprovalDecision) {
    session.approved = session
        .pending
        .iter()
        .filter(|s| decision.approved.contains(&s.id))
        .cloned()
        .collect();

    if session.approved.is_empty() {
        session.reason = Some(match decision.note.as_deref() {
            Some(note) => format!("all setups rejected ({:?}): {}", decision.source, note),
            None => format!("all setups rejected ({:?})", decision.source),
        });
    }
    session.decisions.push(decision);
}

/// Replace the delivery record for `record.setup_id`
pub fn record_delivery(session: &mut Session, record: DeliveryRecord) {
    session.deliveries.retain(|d| d.setup_id != record.setup_id);
    session.deliveries.push(record);
}
