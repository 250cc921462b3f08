use super::*;
use crate::loader::GenerationCache;
use crate::registry::StaticTypes;
use crate::repository::MemoryRepository;
use crate::types::{ResultKind, Value};

fn contract_types() -> StaticTypes {
    StaticTypes::new().with(RecordType {
        name: QualifiedName::record("Contract"),
        fields: vec![
            FieldDef {
                name: "Days".into(),
                field_type: SemanticType::Integer,
            },
            FieldDef {
                name: "Fee".into(),
                field_type: SemanticType::Decimal,
            },
        ],
    })
}

fn compile(name: &str, body: &str) -> Result<ScriptCompilation, CompileError> {
    let types = contract_types();
    Compiler::new(&types).compile_script(&QualifiedName::script(name), body)
}

fn script_failures(err: CompileError) -> Vec<String> {
    match err {
        CompileError::Script { failures, .. } => failures,
        other => panic!("expected aggregated script failure, got {}", other),
    }
}

/* ===================== Scripts ===================== */

#[test]
fn test_identical_expressions_compile_once() {
    let body = r#"
        DeclareInputVar("Var1", "Number");
        DeclareInputVar("Var2", "Number");
        DeclareLocalVar("Diff", "Number", "Var1 - Var2");
        if (LessOrEqualCondition("Var1 - Var2", "1")) {
            SetLocalVar("Diff", "1");
        }
    "#;

    let compilation = compile("Calc", body).unwrap();
    assert_eq!(compilation.expressions.len(), 2);

    let names: Vec<String> = compilation
        .expressions
        .iter()
        .map(|unit| unit.qualified_name.to_string())
        .collect();
    assert_eq!(
        names,
        vec![
            "script.default_group.calc.Calc$$Var1_Mns_Var2",
            "script.default_group.calc.Calc$$$1",
        ]
    );

    // Every call site of the shared text points at the same unit
    let program = load_from_payload(&compilation.unit.qualified_name, &compilation.unit.payload)
        .unwrap();
    let program = program.script().unwrap().clone();
    let Instruction::DeclareLocal { init: Some(init), .. } = &program.statements[2] else {
        panic!("expected initialized local");
    };
    let Instruction::Branch {
        condition,
        then_branch,
        ..
    } = &program.statements[3]
    else {
        panic!("expected branch");
    };
    assert_eq!(condition.left.name, init.name);
    let Instruction::SetLocal { value, .. } = &then_branch[0] else {
        panic!("expected assignment");
    };
    assert_eq!(value.name, condition.right.name);
}

#[test]
fn test_input_manifest_keeps_declaration_order() {
    let body = r#"
        DeclareInputVar("Zeta", "String");
        DeclareLocalVar("Tmp", "Integer");
        DeclareInputVar("Alpha", "Decimal");
        DeclareInputVar("Deal", "Contract");
    "#;

    let compilation = compile("Order", body).unwrap();
    let manifest: Vec<(String, SemanticType)> = compilation
        .input_parameters
        .0
        .iter()
        .map(|p| (p.name.clone(), p.semantic_type.clone()))
        .collect();
    assert_eq!(
        manifest,
        vec![
            ("Zeta".to_string(), SemanticType::String),
            ("Alpha".to_string(), SemanticType::Decimal),
            (
                "Deal".to_string(),
                SemanticType::Record(QualifiedName::record("Contract"))
            ),
        ]
    );
    assert_eq!(
        compilation.unit.input_parameters.as_ref(),
        Some(&compilation.input_parameters)
    );
    assert_eq!(compilation.unit.source_text.as_deref(), Some(body));
    assert!(compilation.expressions.is_empty());
}

#[test]
fn test_failures_are_aggregated() {
    let body = r#"
        DeclareInputVar("Var1", "Number");
        DeclareLocalVar("A", "Number", "Var1 - Var33");
        DeclareLocalVar("B", "String", "'abc' + 1");
        DeclareLocalVar("C", "Widget");
        SetLocalVar("Missing", "1");
        Print("x");
    "#;

    let err = compile("Broken", body).unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("Compilation of the script [Broken] failed\n"));

    let failures = script_failures(err);
    assert_eq!(
        failures,
        vec![
            "Could not parse expression [Var1 - Var33]: Integer value or variable is expected after operand [-], but was [Var33]",
            "Could not parse expression ['abc' + 1]: String value or variable is expected after operand [+], but was [1]",
            "Variable [C] has invalid type [Widget]",
            "Local variable with name [Missing] is not declared",
            "Unknown statement [Print] with 1 argument(s) (line 7)",
        ]
    );
}

#[test]
fn test_translation_errors_are_kept() {
    let err = compile(
        "Twice",
        r#"
        DeclareLocalVar("A", "Number", "1 +");
        DeclareLocalVar("B", "Number", "1 +");
        "#,
    )
    .unwrap_err();

    let CompileError::Script {
        failures,
        translation_errors,
        ..
    } = err
    else {
        panic!("expected script failure");
    };
    // The same broken text is translated and reported once
    assert_eq!(failures.len(), 1);
    assert_eq!(translation_errors.len(), 1);
    assert_eq!(translation_errors[0].token, "+");
}

#[test]
fn test_type_checks() {
    let err = compile(
        "Kinds",
        r#"
        DeclareLocalVar("N", "Integer", "1.5");
        DeclareLocalVar("D", "Decimal", "2");
        DeclareLocalVar("N", "Integer");
        if (EqualCondition("'a'", "1")) {}
        "#,
    )
    .unwrap_err();

    let failures = script_failures(err);
    assert_eq!(failures.len(), 3);
    assert_eq!(
        failures[0],
        "Variable [N] of type [Integer] cannot be assigned expression [1.5] of type [Decimal]"
    );
    assert_eq!(failures[1], "Local variable with name [N] is already declared");
    assert!(failures[2].starts_with("Condition [EqualCondition] cannot compare [String] with [Integer]"));
}

#[test]
fn test_field_path_assignment() {
    let compilation = compile(
        "Fields",
        r#"
        DeclareLocalVar("Deal", "Contract");
        SetLocalVar("Deal.Days", "30");
        SetLocalVar("Deal.Fee", "Deal.Days");
        "#,
    )
    .unwrap();
    assert_eq!(compilation.expressions.len(), 2);

    let err = compile(
        "Fields",
        r#"
        DeclareLocalVar("Deal", "Contract");
        SetLocalVar("Deal.Weeks", "30");
        "#,
    )
    .unwrap_err();
    assert_eq!(script_failures(err), vec!["Field path [Deal.Weeks] is invalid"]);
}

#[test]
fn test_syntax_error() {
    let err = compile("Bad", "DeclareInputVar(\"A\" \"Number\");").unwrap_err();
    assert!(matches!(err, CompileError::Syntax { .. }));
    assert!(err.to_string().starts_with("Compilation of the script [Bad] failed"));
}

/* ===================== Expressions ===================== */

#[test]
fn test_compile_expression() {
    let types = StaticTypes::new();
    let compiler = Compiler::new(&types);
    let name = QualifiedName::script("Calc").expression("$1");

    let unit = compiler.compile_expression(&name, "return int(2 - 1);").unwrap();
    assert!(unit.source_text.is_none());
    let ready = load_from_payload(&name, &unit.payload).unwrap();
    assert_eq!(ready.expression().unwrap().kind, ResultKind::Integer);

    let err = compiler
        .compile_expression(&name, "return int(2 - );")
        .unwrap_err();
    assert!(matches!(err, CompileError::MalformedTarget { .. }));
}

#[test]
fn test_compile_expression_source() {
    let types = StaticTypes::new();
    let compiler = Compiler::new(&types);
    let name = QualifiedName::script("Calc").expression("$1");

    let unit = compiler
        .compile_expression_source(&name, "'abc' + 'd'", &VariableTable::new())
        .unwrap();
    assert_eq!(unit.source_text.as_deref(), Some("'abc' + 'd'"));
    assert_eq!(
        unit.source_digest,
        Some(payload::hash_source("'abc' + 'd'"))
    );

    let err = compiler
        .compile_expression_source(&name, "'abc' + 1", &VariableTable::new())
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Could not parse expression ['abc' + 1]: String value or variable is expected after operand [+], but was [1]"
    );
}

/* ===================== Record Types ===================== */

#[test]
fn test_compile_record_type() {
    let types = contract_types();
    let compiler = Compiler::new(&types);
    let name = QualifiedName::record("Invoice");

    let unit = compiler
        .compile_record_type(&name, "Integer Number; Contract Deal; Invoice Previous; Array Lines;")
        .unwrap();
    let ready = load_from_payload(&name, &unit.payload).unwrap();
    let record_type = ready.record_type().unwrap();

    assert_eq!(record_type.fields.len(), 4);
    assert_eq!(
        record_type.field("Deal").unwrap().field_type,
        SemanticType::Record(QualifiedName::record("Contract"))
    );
    assert_eq!(
        record_type.field("Previous").unwrap().field_type,
        SemanticType::Record(name.clone())
    );
    assert_eq!(
        record_type.instantiate().fields["Lines"],
        Value::Null
    );
}

#[test]
fn test_record_type_errors() {
    let types = contract_types();
    let compiler = Compiler::new(&types);
    let name = QualifiedName::record("Invoice");

    let cases = [
        (
            "Integer",
            "Compilation of record type [Invoice] failed. Expression [Integer] is invalid",
        ),
        (
            "Integer Number Extra",
            "Compilation of record type [Invoice] failed. Expression [Integer Number Extra] is invalid",
        ),
        (
            "Integer 1st",
            "Compilation of record type [Invoice] failed. Expression [Integer 1st] is invalid",
        ),
        (
            "Widget Part",
            "Compilation of record type [Invoice] failed. Field [Part] has unknown type [Widget]",
        ),
        (
            "Integer A; String A",
            "Compilation of record type [Invoice] failed. Field [A] is declared twice",
        ),
    ];

    for (field_spec, message) in cases {
        let err = compiler.compile_record_type(&name, field_spec).unwrap_err();
        assert_eq!(err.to_string(), message);
    }
}

#[test]
fn test_blank_names_are_rejected() {
    let types = contract_types();
    let compiler = Compiler::new(&types);

    let err = compiler
        .compile_script(&QualifiedName::script("  "), r#"DeclareLocalVar("A", "Number");"#)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Qualified name [script.default_group..] has an empty segment"
    );

    let err = compiler
        .compile_record_type(&QualifiedName::record("Billing::"), "Integer Days")
        .unwrap_err();
    assert!(matches!(err, CompileError::InvalidName(_)));

    let err = compiler
        .compile_expression(&QualifiedName::script("").expression("$1"), "return int(1);")
        .unwrap_err();
    assert!(matches!(err, CompileError::InvalidName(_)));
}

/* ===================== Unreadable Record Types ===================== */

fn unavailable_cache() -> GenerationCache {
    let repo = Arc::new(MemoryRepository::new());
    repo.set_available(false);
    GenerationCache::new(repo)
}

fn assert_lookup_failure(err: CompileError, unit: &str) {
    match err {
        CompileError::TypeLookup { name, source } => {
            assert_eq!(name, unit);
            assert!(matches!(source, RepositoryError::Access(_)));
        }
        other => panic!("expected a record type lookup failure, got {}", other),
    }
}

#[test]
fn test_unreadable_repository_fails_script_compile() {
    let cache = unavailable_cache();
    let err = Compiler::new(&cache)
        .compile_script(&QualifiedName::script("Calc"), r#"DeclareLocalVar("C", "Contract");"#)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Compilation of [Calc] failed. Record types could not be read: Repository access failed: memory repository is unavailable"
    );
    assert_lookup_failure(err, "Calc");
}

#[test]
fn test_unreadable_repository_fails_record_type_compile() {
    let cache = unavailable_cache();
    let err = Compiler::new(&cache)
        .compile_record_type(&QualifiedName::record("Invoice"), "Integer Number; Contract Deal")
        .unwrap_err();
    assert_lookup_failure(err, "Invoice");

    // Self references and primitives need no lookup
    Compiler::new(&cache)
        .compile_record_type(&QualifiedName::record("Invoice"), "Integer Number; Invoice Previous")
        .unwrap();
}

#[test]
fn test_unreadable_repository_fails_expression_compile() {
    let cache = unavailable_cache();
    let mut variables = VariableTable::new();
    variables
        .declare_local("C", SemanticType::Record(QualifiedName::record("Contract")))
        .unwrap();

    let err = Compiler::new(&cache)
        .compile_expression_source(&QualifiedName::script("Calc").expression("$1"), "C.Days", &variables)
        .unwrap_err();
    assert_lookup_failure(err, "Calc");
}

#[test]
fn test_missing_record_type_is_still_a_script_failure() {
    let repo = Arc::new(MemoryRepository::new());
    let cache = GenerationCache::new(repo);
    let err = Compiler::new(&cache)
        .compile_script(&QualifiedName::script("Calc"), r#"DeclareLocalVar("C", "Contract");"#)
        .unwrap_err();
    assert_eq!(
        script_failures(err),
        vec!["Variable [C] has invalid type [Contract]".to_string()]
    );
}

/* ===================== Payloads ===================== */

#[test]
fn test_payload_must_match_name() {
    let types = StaticTypes::new();
    let compiler = Compiler::new(&types);
    let record = QualifiedName::record("Point");
    let unit = compiler
        .compile_record_type(&record, "Integer X; Integer Y")
        .unwrap();

    // Stored under a script name
    let err = load_from_payload(&QualifiedName::script("Point"), &unit.payload).unwrap_err();
    assert!(err.to_string().contains("payload holds a record type"));

    // Stored under a different record name
    let err = load_from_payload(&QualifiedName::record("Other"), &unit.payload).unwrap_err();
    assert!(err.to_string().contains("describes record type"));
}

#[test]
fn test_corrupted_payload_is_rejected() {
    let types = StaticTypes::new();
    let compiler = Compiler::new(&types);
    let name = QualifiedName::script("Calc").expression("$1");
    let unit = compiler.compile_expression(&name, "return int(1);").unwrap();

    let tampered = String::from_utf8(unit.payload)
        .unwrap()
        .replace("Integer", "Decimal")
        .into_bytes();
    let err = load_from_payload(&name, &tampered).unwrap_err();
    assert!(err.to_string().contains("digest does not match"));
}

#[test]
fn test_each_load_is_a_new_instance() {
    let types = StaticTypes::new();
    let compiler = Compiler::new(&types);
    let name = QualifiedName::script("Calc").expression("$1");
    let unit = compiler.compile_expression(&name, "return null;").unwrap();

    let first = load_from_payload(&name, &unit.payload).unwrap();
    let second = load_from_payload(&name, &unit.payload).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(first.body(), second.body());
}
