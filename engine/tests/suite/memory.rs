//! Initial memory: reports written by one run seed the next.

use lemmaloop_engine::{
    Budgets, Candidate, CandidateKind, DependencyError, EngineError, Lemma, LemmaId, LemmaStore,
    NonEmptyString, Role, RoundController, TerminationReason, load_memory, write_report,
};

use crate::common::{ScriptedGateway, VALID, final_answer, intermediate, settings, single_attempt};

fn lemma(id: u64, deps: &[u64]) -> Lemma {
    Lemma::new(
        LemmaId::new(id),
        Candidate::new(
            NonEmptyString::new(format!("claim {id}")).unwrap(),
            NonEmptyString::new("proof").unwrap(),
            deps.iter().copied().map(LemmaId::new),
            CandidateKind::Intermediate,
        ),
        0,
    )
}

#[test]
fn path_from_lists_dependencies_first() {
    let store = LemmaStore::seed([lemma(1, &[]), lemma(2, &[1]), lemma(3, &[1, 2])]).unwrap();
    let path: Vec<u64> = store
        .path_from(LemmaId::new(3))
        .iter()
        .map(|l| l.id().value())
        .collect();
    assert_eq!(path, vec![1, 2, 3]);
}

#[tokio::test]
async fn exhausted_report_seeds_the_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("first.json");

    let first = ScriptedGateway::new()
        .replies(
            Role::Propose,
            [intermediate("base", &[]), intermediate("step", &[1])],
        )
        .always(Role::Verify, VALID);
    let budget_two = settings(Budgets {
        lemma_budget: 2,
        ..single_attempt()
    });
    let report = RoundController::new(&first, &budget_two)
        .run("P", Vec::new())
        .await
        .unwrap();
    assert_eq!(report.termination, TerminationReason::Exhausted);
    write_report(&report, &path).unwrap();

    let memory = load_memory(&path).unwrap();
    assert_eq!(memory.len(), 2);

    let second = ScriptedGateway::new()
        .replies(Role::Propose, [final_answer("result", &[2])])
        .always(Role::Verify, VALID);
    let budget_one = settings(Budgets {
        lemma_budget: 1,
        ..single_attempt()
    });
    let report = RoundController::new(&second, &budget_one)
        .run("P", memory)
        .await
        .unwrap();

    assert!(report.is_solved());
    assert_eq!(report.terminal, Some(LemmaId::new(3)));
    let ids: Vec<u64> = report.lemmas.iter().map(|l| l.id.value()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(report.stats.accepted, 1);
    assert!(second.inputs(Role::Propose)[0].contains("** Lemma-2 **\n step"));
}

#[tokio::test]
async fn inconsistent_memory_is_rejected_before_any_call() {
    let gateway = ScriptedGateway::new();
    let settings = settings(single_attempt());
    let err = RoundController::new(&gateway, &settings)
        .run("P", vec![lemma(2, &[1])])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Memory(DependencyError::NotEarlier { .. })
    ));
    assert!(!err.is_fatal());
    assert_eq!(gateway.calls(Role::Propose), 0);
}
