use std::collections::HashMap;
use tandem_common::protocol::{Locator, Primitive};
use tandem_common::spec::{
    substitute_step, ExecutionPath, FallbackPath, IntentSpec, ParamSpec, StepSpec,
    ValidationError, ValidationWarning,
};

fn step(name: &str) -> StepSpec {
    StepSpec {
        name: name.to_string(),
        instruction: String::new(),
        snippet: Vec::new(),
        preferred: None,
        fallback: FallbackPath::None,
        locator: None,
        value: None,
    }
}

fn spec(steps: Vec<StepSpec>) -> IntentSpec {
    IntentSpec {
        name: "login".to_string(),
        url: "https://example.com".to_string(),
        params: Vec::new(),
        default_path: ExecutionPath::Deterministic,
        steps,
    }
}

fn param(name: &str, default: Option<&str>) -> ParamSpec {
    ParamSpec {
        name: name.to_string(),
        required: default.is_none(),
        default: default.map(String::from),
        description: None,
    }
}

#[test]
fn test_valid_spec_passes_without_warnings() {
    let mut s = spec(vec![StepSpec {
        value: Some("{{USERNAME}}".to_string()),
        ..step("fill_user")
    }]);
    s.params.push(param("USERNAME", None));
    assert_eq!(s.validate().unwrap(), Vec::new());
}

#[test]
fn test_undeclared_parameter_is_named() {
    let s = spec(vec![StepSpec {
        value: Some("{{USERNAME}}".to_string()),
        ..step("fill_user")
    }]);
    assert_eq!(
        s.validate().unwrap_err(),
        ValidationError::UndeclaredParameter {
            param: "USERNAME".to_string(),
            step: "fill_user".to_string(),
        }
    );
}

#[test]
fn test_parameter_inside_snippet_is_checked() {
    let s = spec(vec![StepSpec {
        snippet: vec![Primitive::Fill {
            locator: Locator::Css("#user".to_string()),
            value: "{{USERNAME}}".to_string(),
        }],
        ..step("fill_user")
    }]);
    assert!(matches!(
        s.validate(),
        Err(ValidationError::UndeclaredParameter { .. })
    ));
}

#[test]
fn test_fallback_equal_to_preferred_is_rejected() {
    let s = spec(vec![StepSpec {
        fallback: FallbackPath::Deterministic,
        ..step("click_login")
    }]);
    assert_eq!(
        s.validate().unwrap_err(),
        ValidationError::FallbackMatchesPreferred("click_login".to_string())
    );
}

#[test]
fn test_duplicate_step_names_rejected() {
    let s = spec(vec![step("login"), step("login")]);
    assert_eq!(
        s.validate().unwrap_err(),
        ValidationError::DuplicateStepName("login".to_string())
    );
}

#[test]
fn test_empty_name_and_no_steps_rejected() {
    let mut s = spec(vec![step("a")]);
    s.name = "  ".to_string();
    assert_eq!(s.validate().unwrap_err(), ValidationError::EmptySpecName);

    let s = spec(Vec::new());
    assert_eq!(s.validate().unwrap_err(), ValidationError::NoSteps);
}

#[test]
fn test_unused_parameter_only_warns() {
    let mut s = spec(vec![step("login")]);
    s.params.push(param("UNUSED", Some("x")));
    assert_eq!(
        s.validate().unwrap(),
        vec![ValidationWarning::UnusedParameter("UNUSED".to_string())]
    );
}

#[test]
fn test_resolve_variables_applies_defaults_and_rejects_missing() {
    let mut s = spec(vec![step("login")]);
    s.params.push(param("HOST", Some("example.com")));
    s.params.push(param("USERNAME", None));

    let mut provided = HashMap::new();
    provided.insert("USERNAME".to_string(), "ada".to_string());
    let resolved = s.resolve_variables(&provided).unwrap();
    assert_eq!(resolved["HOST"], "example.com");
    assert_eq!(resolved["USERNAME"], "ada");

    assert_eq!(
        s.resolve_variables(&HashMap::new()).unwrap_err(),
        ValidationError::MissingParameter("USERNAME".to_string())
    );
}

#[test]
fn test_substitute_step_binds_every_field() {
    let template = StepSpec {
        instruction: "log in as {{USERNAME}}".to_string(),
        snippet: vec![Primitive::Fill {
            locator: Locator::Css("#user".to_string()),
            value: "{{ USERNAME }}".to_string(),
        }],
        value: Some("{{USERNAME}}".to_string()),
        ..step("fill_user")
    };
    let mut vars = HashMap::new();
    vars.insert("USERNAME".to_string(), "ada".to_string());

    let bound = substitute_step(&template, &vars);
    assert_eq!(bound.instruction, "log in as ada");
    assert_eq!(bound.value.as_deref(), Some("ada"));
    match &bound.snippet[0] {
        Primitive::Fill { value, .. } => assert_eq!(value, "ada"),
        other => panic!("Unexpected primitive: {:?}", other),
    }
    // The template itself is untouched.
    assert_eq!(template.value.as_deref(), Some("{{USERNAME}}"));
}
