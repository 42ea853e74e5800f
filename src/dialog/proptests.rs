//! Property-based tests for the dialog
//!
//! These tests verify key invariants hold across all possible inputs.

use super::interrupt;
use super::messages;
use super::*;
use crate::activity::{Inbound, TokenGrant};
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::Map;

// ============================================================================
// Test Helpers
// ============================================================================

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn context_at(offset_secs: i64) -> DialogContext {
    DialogContext::new(
        "test-conv",
        epoch() + Duration::seconds(offset_secs),
        Duration::seconds(300),
    )
}

/// One turn the way the processor runs it: interrupt first, then the dialog
fn step(state: &DialogState, ctx: &DialogContext, inbound: Inbound) -> Option<TransitionResult> {
    if let Some(result) = interrupt::check(state, &inbound) {
        return Some(result);
    }
    let event = Event::from_inbound(inbound)?;
    transition(state, ctx, event).ok()
}

fn logout_messages(effects: &[Effect]) -> usize {
    effects
        .iter()
        .filter(|e| **e == Effect::send_text(messages::SIGNED_OUT))
        .count()
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_grant() -> impl Strategy<Value = TokenGrant> {
    ("[a-z0-9]{4,12}", "[A-Za-z0-9]{8,32}").prop_map(|(subject_id, token)| TokenGrant {
        subject_id,
        profile: Map::new(),
        token,
        expires_at: None,
    })
}

fn arb_non_logout_text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{0,30}".prop_filter("not a logout", |t| !interrupt::is_logout(t))
}

fn arb_logout_text() -> impl Strategy<Value = String> {
    (
        prop_oneof![
            Just("logout"),
            Just("LOGOUT"),
            Just("Logout"),
            Just("lOgOuT")
        ],
        " {0,3}",
        " {0,3}",
    )
        .prop_map(|(word, pre, post)| format!("{pre}{word}{post}"))
}

fn arb_inbound() -> impl Strategy<Value = Inbound> {
    prop_oneof![
        4 => arb_non_logout_text().prop_map(|text| Inbound::Message { text }),
        1 => arb_logout_text().prop_map(|text| Inbound::Message { text }),
        2 => proptest::option::of(arb_grant()).prop_map(|grant| Inbound::TokenDelivery { grant }),
        1 => Just(Inbound::MemberJoin { members: vec![] }),
        1 => Just(Inbound::Unsupported),
    ]
}

fn arb_state() -> impl Strategy<Value = DialogState> {
    prop_oneof![
        Just(DialogState::Idle),
        (0i64..299).prop_map(|age| DialogState::awaiting(
            epoch() - Duration::seconds(age),
            Duration::seconds(300)
        )),
    ]
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // A waiting conversation is not restarted by ordinary chatter
    #[test]
    fn prop_awaiting_survives_non_token_activity(
        age in 0i64..299,
        inbound in prop_oneof![
            arb_non_logout_text().prop_map(|text| Inbound::Message { text }),
            Just(Inbound::MemberJoin { members: vec![] }),
            Just(Inbound::Unsupported),
        ]
    ) {
        let ctx = context_at(0);
        let state = DialogState::awaiting(ctx.now - Duration::seconds(age), ctx.prompt_timeout);

        match step(&state, &ctx, inbound) {
            Some(result) => {
                prop_assert_eq!(&result.new_state, &state);
                prop_assert!(result.effects.is_empty());
            }
            None => { /* never reached the dialog */ }
        }
    }

    // Prompts only start from idle
    #[test]
    fn prop_prompt_only_from_idle(inbounds in proptest::collection::vec(arb_inbound(), 0..30)) {
        let mut state = DialogState::Idle;
        for (i, inbound) in inbounds.into_iter().enumerate() {
            let ctx = context_at(i64::try_from(i).unwrap());
            let was_idle = state == DialogState::Idle;
            if let Some(result) = step(&state, &ctx, inbound) {
                let prompts = result
                    .effects
                    .iter()
                    .filter(|e| matches!(e, Effect::BeginPrompt { .. }))
                    .count();
                prop_assert!(prompts <= 1);
                if prompts == 1 {
                    prop_assert!(was_idle, "prompt issued while awaiting");
                    prop_assert!(result.new_state.waiting_for_token());
                }
                state = result.new_state;
            }
        }
    }

    // Logout wins in every state and confirms exactly once
    #[test]
    fn prop_logout_precedence(state in arb_state(), text in arb_logout_text()) {
        let ctx = context_at(0);
        let result = step(&state, &ctx, Inbound::Message { text }).unwrap();

        prop_assert_eq!(result.new_state, DialogState::Idle);
        prop_assert_eq!(logout_messages(&result.effects), 1);
        prop_assert!(result.effects.contains(&Effect::SignOut));
        let prompted = result.effects.iter().any(|e| matches!(e, Effect::BeginPrompt { .. }));
        prop_assert!(!prompted, "logout must not issue a prompt");
    }

    // A failed delivery returns to idle and the next message prompts again
    #[test]
    fn prop_failed_login_allows_retry(age in 0i64..299, text in arb_non_logout_text()) {
        let ctx = context_at(0);
        let state = DialogState::awaiting(ctx.now - Duration::seconds(age), ctx.prompt_timeout);

        let failed = step(&state, &ctx, Inbound::TokenDelivery { grant: None }).unwrap();
        prop_assert_eq!(&failed.new_state, &DialogState::Idle);
        prop_assert_eq!(&failed.effects, &vec![Effect::send_text(messages::LOGIN_FAILED)]);

        let retry = step(&failed.new_state, &ctx, Inbound::Message { text }).unwrap();
        let reprompted = matches!(retry.effects.as_slice(), [Effect::BeginPrompt { .. }]);
        prop_assert!(reprompted, "retry after failure should prompt again");
    }

    // Every transition out of a waiting state either keeps waiting or
    // ends with exactly one user-visible message
    #[test]
    fn prop_leaving_awaiting_reports_outcome(state in arb_state(), inbound in arb_inbound()) {
        let ctx = context_at(0);
        if !state.waiting_for_token() {
            return Ok(());
        }
        if let Some(result) = step(&state, &ctx, inbound) {
            if result.new_state == DialogState::Idle {
                let sends = result
                    .effects
                    .iter()
                    .filter(|e| matches!(e, Effect::SendText { .. }))
                    .count();
                prop_assert_eq!(sends, 1);
            }
        }
    }
}
