//! Round controller behavior against a scripted gateway.

use lemmaloop_engine::{
    Budgets, EngineError, FatalError, FinalReport, GatewayError, LemmaId, Role, RoundController,
    ScalingFactor, TerminationReason,
};

use crate::common::{
    INVALID, ScriptedGateway, VALID, final_answer, intermediate, settings, single_attempt,
};

fn ids(report: &FinalReport) -> Vec<u64> {
    report.lemmas.iter().map(|l| l.id.value()).collect()
}

#[tokio::test]
async fn single_final_candidate_is_solved() {
    let gateway = ScriptedGateway::new()
        .replies(Role::Propose, [final_answer("The answer is 7.", &[])])
        .replies(Role::Verify, [VALID]);
    let settings = settings(Budgets {
        lemma_budget: 1,
        ..single_attempt()
    });

    let report = RoundController::new(&gateway, &settings)
        .run("Find the answer.", Vec::new())
        .await
        .unwrap();

    assert_eq!(report.termination, TerminationReason::Solved);
    assert_eq!(ids(&report), vec![1]);
    assert_eq!(report.answer(), Some("The answer is 7."));
    assert_eq!(report.stats.accepted, 1);
}

#[tokio::test]
async fn lemma_budget_stops_proposing() {
    let gateway = ScriptedGateway::new()
        .always(Role::Propose, &intermediate("step", &[]))
        .always(Role::Verify, VALID);
    let settings = settings(Budgets {
        lemma_budget: 2,
        ..single_attempt()
    });

    let report = RoundController::new(&gateway, &settings)
        .run("P", Vec::new())
        .await
        .unwrap();

    assert_eq!(report.termination, TerminationReason::Exhausted);
    assert_eq!(ids(&report), vec![1, 2]);
    assert_eq!(gateway.calls(Role::Propose), 2);
}

#[tokio::test]
async fn remaining_quota_shrinks_in_propose_input() {
    let gateway = ScriptedGateway::new()
        .replies(
            Role::Propose,
            [intermediate("first", &[]), final_answer("done", &[1])],
        )
        .always(Role::Verify, VALID);
    let settings = settings(Budgets {
        lemma_budget: 3,
        ..single_attempt()
    });

    RoundController::new(&gateway, &settings)
        .run("P", Vec::new())
        .await
        .unwrap();

    let inputs = gateway.inputs(Role::Propose);
    assert!(inputs[0].contains("at most 3 lemmas"));
    assert!(!inputs[0].contains("<memory>"));
    assert!(inputs[1].contains("at most 2 lemmas"));
    assert!(inputs[1].contains("** Lemma-1 **\n first"));
}

#[tokio::test]
async fn certificate_contains_only_the_dependency_path() {
    let gateway = ScriptedGateway::new()
        .replies(
            Role::Propose,
            [
                intermediate("base", &[]),
                intermediate("step", &[1]),
                intermediate("detour", &[]),
                final_answer("result", &[2]),
            ],
        )
        .always(Role::Verify, VALID);
    let settings = settings(single_attempt());

    let report = RoundController::new(&gateway, &settings)
        .run("P", Vec::new())
        .await
        .unwrap();

    assert!(report.is_solved());
    assert_eq!(report.terminal, Some(LemmaId::new(4)));
    assert_eq!(ids(&report), vec![1, 2, 4]);
    assert_eq!(report.stats.accepted, 4);
}

#[tokio::test]
async fn verifier_sees_only_declared_dependencies() {
    let gateway = ScriptedGateway::new()
        .replies(
            Role::Propose,
            [
                intermediate("alpha", &[]),
                intermediate("beta", &[]),
                final_answer("gamma", &[2]),
            ],
        )
        .always(Role::Verify, VALID);
    let settings = settings(single_attempt());

    RoundController::new(&gateway, &settings)
        .run("P", Vec::new())
        .await
        .unwrap();

    let last = gateway.inputs(Role::Verify).pop().unwrap();
    assert!(last.contains("beta"));
    assert!(!last.contains("alpha"));
}

#[tokio::test]
async fn one_dissent_out_of_three_rejects_with_its_rationale() {
    let gateway = ScriptedGateway::new()
        .replies(Role::Propose, [final_answer("claim", &[])])
        .replies(Role::Verify, [VALID, VALID, INVALID, VALID, VALID, VALID])
        .replies(
            Role::Refine,
            ["\\begin{conjecture}claim\\end{conjecture}\n\\begin{proof}No division.\\end{proof}"],
        );
    let settings = settings(Budgets {
        verification_scaling: ScalingFactor::new(3).unwrap(),
        ..Budgets::default()
    });

    let report = RoundController::new(&gateway, &settings)
        .run("P", Vec::new())
        .await
        .unwrap();

    let refine_inputs = gateway.inputs(Role::Refine);
    assert_eq!(refine_inputs.len(), 1);
    assert!(refine_inputs[0].contains("Step 2 divides by zero."));
    assert!(!refine_inputs[0].contains("Every step checks out."));
    assert!(report.is_solved());
    assert_eq!(report.lemmas[0].proof, "No division.");
    assert_eq!(report.stats.verification_attempts, 6);
}

#[tokio::test]
async fn verify_refine_budget_drops_lineage() {
    let gateway = ScriptedGateway::new()
        .replies(Role::Propose, [final_answer("claim", &[])])
        .always(Role::Verify, INVALID)
        .always(
            Role::Refine,
            "\\begin{conjecture}claim\\end{conjecture}\\begin{proof}again\\end{proof}",
        );
    let settings = settings(Budgets {
        verify_refine_rounds: 1,
        solver_rounds: 1,
        ..single_attempt()
    });

    let report = RoundController::new(&gateway, &settings)
        .run("P", Vec::new())
        .await
        .unwrap();

    assert_eq!(gateway.calls(Role::Verify), 2);
    assert_eq!(gateway.calls(Role::Refine), 1);
    assert_eq!(gateway.calls(Role::Propose), 1);
    assert!(report.lemmas.is_empty());
    assert_eq!(report.termination, TerminationReason::Exhausted);
    assert_eq!(report.stats.dropped_lineages, 1);
}

#[tokio::test]
async fn malformed_refine_output_drops_lineage_after_budget() {
    let gateway = ScriptedGateway::new()
        .replies(
            Role::Propose,
            [intermediate("shaky", &[]), final_answer("solid", &[])],
        )
        .replies(Role::Verify, [INVALID, VALID])
        .always(Role::Refine, "I would rather not use the environments.");
    let settings = settings(Budgets {
        refiner_retries: 2,
        ..single_attempt()
    });

    let report = RoundController::new(&gateway, &settings)
        .run("P", Vec::new())
        .await
        .unwrap();

    assert_eq!(gateway.calls(Role::Refine), 3);
    assert_eq!(gateway.calls(Role::Propose), 2);
    assert_eq!(report.stats.dropped_lineages, 1);
    assert!(report.is_solved());
    assert_eq!(ids(&report), vec![1]);
    assert_eq!(report.answer(), Some("solid"));
}

#[tokio::test]
async fn disproved_candidate_returns_to_solving() {
    let gateway = ScriptedGateway::new()
        .replies(
            Role::Propose,
            [intermediate("false claim", &[]), final_answer("true claim", &[])],
        )
        .replies(Role::Verify, [INVALID, VALID])
        .replies(Role::Refine, ["Counterexample: n = 3.\n\\boxed{false}"]);
    let settings = settings(single_attempt());

    let report = RoundController::new(&gateway, &settings)
        .run("P", Vec::new())
        .await
        .unwrap();

    assert_eq!(report.answer(), Some("true claim"));
    assert_eq!(report.stats.dropped_lineages, 1);
    assert_eq!(report.stats.solver_rounds, 2);
}

#[tokio::test]
async fn solver_round_budget_terminates_when_every_lineage_drops() {
    let gateway = ScriptedGateway::new()
        .always(Role::Propose, &intermediate("hopeless", &[]))
        .always(Role::Verify, INVALID)
        .always(Role::Refine, "\\boxed{false}");
    let settings = settings(Budgets {
        solver_rounds: 4,
        ..single_attempt()
    });

    let report = RoundController::new(&gateway, &settings)
        .run("P", Vec::new())
        .await
        .unwrap();

    assert_eq!(report.termination, TerminationReason::Exhausted);
    assert_eq!(gateway.calls(Role::Propose), 4);
    assert_eq!(report.stats.dropped_lineages, 4);
}

#[tokio::test]
async fn unknown_dependency_is_malformed_and_retried() {
    let gateway = ScriptedGateway::new()
        .replies(
            Role::Propose,
            [final_answer("uses ghost", &[9]), final_answer("standalone", &[])],
        )
        .replies(Role::Verify, [VALID]);
    let settings = settings(single_attempt());

    let report = RoundController::new(&gateway, &settings)
        .run("P", Vec::new())
        .await
        .unwrap();

    assert_eq!(gateway.calls(Role::Propose), 2);
    assert_eq!(gateway.calls(Role::Verify), 1);
    assert_eq!(report.answer(), Some("standalone"));
    assert_eq!(report.stats.solver_rounds, 1);
}

#[tokio::test]
async fn propose_retry_budget_exhaustion_is_fatal() {
    let gateway = ScriptedGateway::new().always(Role::Propose, "no tags at all");
    let settings = settings(Budgets {
        propose_retries: 2,
        ..single_attempt()
    });

    let err = RoundController::new(&gateway, &settings)
        .run("P", Vec::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Fatal(FatalError::MalformedExhausted {
            role: Role::Propose,
            attempts: 3,
            ..
        })
    ));
    assert_eq!(gateway.calls(Role::Propose), 3);
}

#[tokio::test]
async fn transient_errors_are_retried_within_call_budget() {
    let gateway = ScriptedGateway::new()
        .error(Role::Propose, GatewayError::Transient("reset".into()))
        .error(Role::Propose, GatewayError::Transient("reset".into()))
        .replies(Role::Propose, [final_answer("x", &[])])
        .replies(Role::Verify, [VALID]);
    let settings = settings(Budgets {
        call_retries: 2,
        ..single_attempt()
    });

    let report = RoundController::new(&gateway, &settings)
        .run("P", Vec::new())
        .await
        .unwrap();
    assert!(report.is_solved());
    assert_eq!(gateway.calls(Role::Propose), 3);
}

#[tokio::test]
async fn transient_errors_beyond_call_budget_are_fatal() {
    let gateway = ScriptedGateway::new()
        .error(Role::Verify, GatewayError::Transient("503".into()))
        .error(Role::Verify, GatewayError::Transient("503".into()))
        .replies(Role::Propose, [final_answer("x", &[])])
        .replies(Role::Verify, [VALID]);
    let settings = settings(Budgets {
        call_retries: 1,
        ..single_attempt()
    });

    let err = RoundController::new(&gateway, &settings)
        .run("P", Vec::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Fatal(FatalError::RetriesExhausted {
            role: Role::Verify,
            attempts: 2,
            ..
        })
    ));
}

#[tokio::test]
async fn fatal_gateway_error_is_not_retried() {
    let gateway = ScriptedGateway::new()
        .error(Role::Propose, GatewayError::Fatal("401 unauthorized".into()))
        .always(Role::Propose, &final_answer("never", &[]));
    let settings = settings(single_attempt());

    let err = RoundController::new(&gateway, &settings)
        .run("P", Vec::new())
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(gateway.calls(Role::Propose), 1);
}
