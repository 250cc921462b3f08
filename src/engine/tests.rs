use std::sync::Barrier;

use super::*;
use crate::registry::StaticTypes;
use crate::repository::{CodeRepository, MemoryRepository, RepositoryError};
use crate::types::RecordValue;

const CALC: &str = r#"
    DeclareInputVar("Var1", "Number");
    DeclareInputVar("Var2", "Number");
    DeclareLocalVar("Diff", "Number", "Var1 - Var2");
    DeclareLocalVar("Label", "String");
    if (LessOrEqualCondition("Diff", "1")) {
        SetLocalVar("Label", "'small'");
    } else {
        SetLocalVar("Label", "'large'");
    }
"#;

fn calc() -> QualifiedName {
    QualifiedName::script("Calc")
}

/// Repository holding the compiled `Calc` script and its expression units
fn stored_calc() -> Arc<MemoryRepository> {
    let repo = Arc::new(MemoryRepository::new());
    let types = StaticTypes::new();
    let compilation = Compiler::new(&types).compile_script(&calc(), CALC).unwrap();
    for unit in compilation.units() {
        repo.save(&unit.qualified_name, &unit.payload, unit.source_text.as_deref())
            .unwrap();
    }
    repo
}

fn engine_over(repo: &Arc<MemoryRepository>) -> RuntimeEngine {
    RuntimeEngine::new(Arc::new(GenerationCache::new(repo.clone())))
}

/* ===================== Execution ===================== */

#[test]
fn test_run_script_source() {
    let engine = RuntimeEngine::standalone();

    let run = engine.run_script_source(&calc(), CALC, vec![Value::Integer(3), Value::Integer(1)]);
    assert!(run.is_completed(), "run failed: {:?}", run.error);
    assert_eq!(run.script, "Calc");
    assert_eq!(run.locals["Diff"], Value::Integer(2));
    assert_eq!(run.locals["Label"], Value::String("large".into()));
    assert!(run.finished_at >= run.started_at);

    let run = engine.run_script_source(&calc(), CALC, vec![Value::Integer(1), Value::Integer(1)]);
    assert_eq!(run.locals["Label"], Value::String("small".into()));
}

#[test]
fn test_expression_units_are_seeded_by_script_compile() {
    let engine = RuntimeEngine::standalone();
    engine.run_script_source(&calc(), CALC, vec![Value::Integer(3), Value::Integer(1)]);
    engine.run_script_source(&calc(), CALC, vec![Value::Integer(5), Value::Integer(1)]);

    // Only the script itself was compiled; its expressions came along with it
    assert_eq!(engine.compile_count(), 1);
}

#[test]
fn test_run_ids_are_unique() {
    let engine = RuntimeEngine::standalone();
    let inputs = || vec![Value::Integer(3), Value::Integer(1)];
    let first = engine.run_script_source(&calc(), CALC, inputs());
    let second = engine.run_script_source(&calc(), CALC, inputs());
    assert_ne!(first.id, second.id);
}

#[test]
fn test_record_fields_at_runtime() {
    let engine = RuntimeEngine::standalone();
    engine
        .define_record_type(&QualifiedName::record("Person"), "String Name; Integer Age")
        .unwrap();

    let body = r#"
        DeclareInputVar("Who", "String");
        DeclareLocalVar("P", "Person");
        SetLocalVar("P.Name", "Who");
        SetLocalVar("P.Age", "40");
        DeclareLocalVar("Greeting", "String", "'Hello ' + P.Name");
    "#;
    let run = engine.run_script_source(
        &QualifiedName::script("Greet"),
        body,
        vec![Value::String("Ann".into())],
    );
    assert!(run.is_completed(), "run failed: {:?}", run.error);
    assert_eq!(run.locals["Greeting"], Value::String("Hello Ann".into()));

    let Value::Record(RecordValue { type_name, fields }) = &run.locals["P"] else {
        panic!("P should hold a record");
    };
    assert_eq!(*type_name, QualifiedName::record("Person"));
    assert_eq!(fields["Age"], Value::Integer(40));
}

#[test]
fn test_failed_runs_carry_the_error_chain() {
    let engine = RuntimeEngine::standalone();
    let body = r#"
        DeclareInputVar("D", "Number");
        DeclareLocalVar("R", "Number", "10 / D");
    "#;
    let run = engine.run_script_source(&QualifiedName::script("Div"), body, vec![Value::Integer(0)]);

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(
        run.error.as_deref(),
        Some("Evaluation of expression [10 / D] failed: Division by zero in [10 / 0]")
    );
    assert!(run.locals.is_empty());
}

#[test]
fn test_missing_input_fails_the_run() {
    let engine = RuntimeEngine::standalone();
    let run = engine.run_script_source(&calc(), CALC, vec![Value::Integer(3)]);
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(
        run.error.as_deref(),
        Some("No input value is left for input variable [Var2]")
    );
}

#[test]
fn test_compile_errors_fail_the_run() {
    let engine = RuntimeEngine::standalone();
    let run = engine.run_script_source(
        &QualifiedName::script("Bad"),
        r#"DeclareLocalVar("A", "Number", "1 + 'x'");"#,
        vec![],
    );
    let error = run.error.unwrap();
    assert!(error.starts_with("Compilation of the script [Bad] failed\n"));
    assert_eq!(engine.compile_count(), 0);
}

#[test]
fn test_wrong_kind_is_rejected() {
    let engine = RuntimeEngine::standalone();
    let person = QualifiedName::record("Person");
    engine.define_record_type(&person, "String Name").unwrap();

    let run = engine.run_script(&person, vec![]);
    assert_eq!(
        run.error.as_deref(),
        Some("Compiled unit [record.default_group.Person] is a record type, expected a script")
    );
}

/* ===================== Resolution ===================== */

#[test]
fn test_stored_scripts_need_no_compile() {
    let repo = stored_calc();
    let engine = engine_over(&repo);

    let run = engine.run_script(&calc(), vec![Value::Integer(3), Value::Integer(1)]);
    assert!(run.is_completed(), "run failed: {:?}", run.error);
    assert_eq!(run.locals["Diff"], Value::Integer(2));
    assert_eq!(engine.compile_count(), 0);
}

#[test]
fn test_missing_without_fallback_is_not_found() {
    let engine = engine_over(&Arc::new(MemoryRepository::new()));
    let err = engine.get_executable(&calc(), None).unwrap_err();
    assert!(matches!(err, ExecutionError::NotFound(name) if name == calc()));
}

#[test]
fn test_repository_failure_is_a_hard_error() {
    let repo = stored_calc();
    let engine = engine_over(&repo);
    repo.set_available(false);

    let err = engine
        .get_executable(&calc(), Some(Fallback::Script { body: CALC }))
        .unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::Loader(LoaderError::Repository(RepositoryError::Access(_)))
    ));
    assert_eq!(engine.compile_count(), 0);
}

#[test]
fn test_reload_clears_fast_cache() {
    let repo = Arc::new(MemoryRepository::new());
    let engine = engine_over(&repo);
    let inputs = || vec![Value::Integer(3), Value::Integer(1)];

    engine.run_script_source(&calc(), CALC, inputs());
    engine.run_script_source(&calc(), CALC, inputs());
    assert_eq!(engine.compile_count(), 1);

    engine.generations().unwrap().reload_all();
    engine.run_script_source(&calc(), CALC, inputs());
    assert_eq!(engine.compile_count(), 2);
}

#[test]
fn test_concurrent_callers_compile_once() {
    const CALLERS: usize = 16;
    let engine = RuntimeEngine::standalone();
    let name = QualifiedName::script("Calc").expression("Var1_Mns_Var2");

    let mut table = VariableTable::with_inputs(vec![Value::Integer(3), Value::Integer(1)]);
    table.bind_input("Var1", crate::types::SemanticType::Integer).unwrap();
    table.bind_input("Var2", crate::types::SemanticType::Integer).unwrap();

    let barrier = Barrier::new(CALLERS);
    let units: Vec<ReadyUnit> = std::thread::scope(|scope| {
        let callers: Vec<_> = (0..CALLERS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    engine
                        .get_executable(
                            &name,
                            Some(Fallback::Expression {
                                text: "Var1 - Var2",
                                variables: &table,
                            }),
                        )
                        .unwrap()
                })
            })
            .collect();
        callers.into_iter().map(|c| c.join().unwrap()).collect()
    });

    assert_eq!(engine.compile_count(), 1);
    assert!(units.iter().all(|unit| Arc::ptr_eq(unit, &units[0])));
    assert_eq!(engine.compile_lock_count(), 0);
}

#[test]
fn test_compile_locks_do_not_accumulate() {
    let engine = RuntimeEngine::standalone();
    let inputs = || vec![Value::Integer(3), Value::Integer(1)];

    for index in 0..50 {
        let name = QualifiedName::script(&format!("Calc{}", index));
        let run = engine.run_script_source(&name, CALC, inputs());
        assert!(run.is_completed(), "run failed: {:?}", run.error);
    }
    let run = engine.run_script_source(
        &QualifiedName::script("Bad"),
        r#"DeclareLocalVar("A", "Number", "1 + 'x'");"#,
        vec![],
    );
    assert!(!run.is_completed());

    assert_eq!(engine.compile_count(), 50);
    assert_eq!(engine.compile_lock_count(), 0);
}

#[test]
fn test_error_chain_skips_repeated_causes() {
    let err = ExecutionError::Evaluation {
        expression: "1 / 0".into(),
        source: EvalError::DivisionByZero {
            lhs: "1".into(),
            rhs: "0".into(),
        },
    };
    assert_eq!(
        error_chain(&err),
        "Evaluation of expression [1 / 0] failed: Division by zero in [1 / 0]"
    );
}
