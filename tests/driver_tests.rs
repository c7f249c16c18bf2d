mod common;

use common::fixtures::{self, ORDERS, program};
use common::{
    TestHost, TestLoader, TestResult, config, config_with_method, init_logging, run_to_end,
    new_transformation,
};
use std::sync::Arc;
use xsltvm::engine::testing::ScriptedEvaluator;
use xsltvm::engine::{Instruction, ProgramKind};
use xsltvm::output::TokenCollector;
use xsltvm::{
    MessageKind, OutputMethod, OutputTarget, Status, StylesheetBuilder, TransformConfig,
    TransformError, Transformation, TransformationState, Value, parse_document,
    transform_to_string,
};

#[test]
fn states_move_from_not_started_to_finished() -> TestResult {
    init_logging();
    let (stylesheet, evaluator) = fixtures::order_report(false);
    let (mut transformation, buffer) = new_transformation(stylesheet, evaluator, ORDERS, config(4))?;
    assert_eq!(transformation.state(), TransformationState::NotStarted);

    assert_eq!(transformation.step()?, Status::Paused);
    assert_eq!(transformation.state(), TransformationState::Paused);

    let pauses = run_to_end(&mut transformation)?;
    assert!(pauses > 1);
    assert_eq!(transformation.state(), TransformationState::Finished);
    assert_eq!(transformation.step()?, Status::Finished);
    assert!(buffer.contents().ends_with("</report>"));
    assert!(buffer.is_ended());
    Ok(())
}

#[test]
fn html_output_is_detected_from_the_first_element() -> TestResult {
    init_logging();
    let (stylesheet, evaluator) = fixtures::html_page();
    let (mut transformation, buffer) = new_transformation(stylesheet, evaluator, "<in/>", config(100))?;
    assert_eq!(transformation.run()?, Status::Finished);
    let output = buffer.contents();
    assert!(output.starts_with("<HTML><BODY>"), "{}", output);
    assert!(output.contains(r#"<IMG SRC="a.png">"#));
    assert!(!output.contains("</IMG>"));
    Ok(())
}

#[test]
fn deferred_decision_waits_for_the_caller() -> TestResult {
    init_logging();
    let (stylesheet, evaluator) = fixtures::html_page();
    let mut settings = config(100);
    settings.defer_output_decision = true;
    let (mut transformation, buffer) = new_transformation(stylesheet, evaluator, "<in/>", settings)?;

    assert_eq!(
        transformation.run()?,
        Status::NeedsOutputDecision(OutputMethod::Html)
    );
    assert_eq!(transformation.state(), TransformationState::NeedsOutputDecision);
    assert_eq!(transformation.detected_output_method(), Some(OutputMethod::Html));
    assert!(buffer.contents().is_empty());
    assert!(matches!(
        transformation.step(),
        Err(TransformError::InvalidState { .. })
    ));

    transformation.set_output_method(OutputMethod::Xml)?;
    assert_eq!(transformation.run()?, Status::Finished);
    assert_eq!(
        buffer.contents(),
        r#"<html><body><img src="a.png"/>x &lt; y</body></html>"#
    );
    Ok(())
}

#[test]
fn confirming_the_detected_method() -> TestResult {
    init_logging();
    let (stylesheet, evaluator) = fixtures::order_report(false);
    let mut settings = config(100);
    settings.defer_output_decision = true;
    let (mut transformation, buffer) = new_transformation(stylesheet, evaluator, ORDERS, settings)?;
    assert_eq!(
        transformation.run()?,
        Status::NeedsOutputDecision(OutputMethod::Xml)
    );
    transformation.confirm_output_method()?;
    assert_eq!(transformation.run()?, Status::Finished);
    assert!(buffer.contents().starts_with("<report>"));
    Ok(())
}

#[test]
fn leading_text_selects_xml() -> TestResult {
    init_logging();
    let (stylesheet, evaluator) = fixtures::chatty(false);
    let (mut transformation, buffer) = new_transformation(stylesheet, evaluator, "<in/>", config(100))?;
    assert_eq!(transformation.run()?, Status::Finished);
    assert_eq!(transformation.detected_output_method(), Some(OutputMethod::Xml));
    assert_eq!(buffer.contents(), "ok");
    Ok(())
}

#[test]
fn whitespace_only_output_is_decided_at_the_end() -> TestResult {
    init_logging();
    let mut builder = StylesheetBuilder::new();
    let root = builder.add_program(program(ProgramKind::Root, |b| {
        b.text("\n  ").push(Instruction::Return);
    }));
    let mut settings = config(100);
    settings.defer_output_decision = true;
    let (mut transformation, buffer) =
        new_transformation(builder.build(root)?, ScriptedEvaluator::new(), "<in/>", settings)?;

    assert_eq!(
        transformation.run()?,
        Status::NeedsOutputDecision(OutputMethod::Xml)
    );
    transformation.set_output_method(OutputMethod::Text)?;
    assert_eq!(transformation.run()?, Status::Finished);
    assert_eq!(buffer.contents(), "\n  ");
    assert!(buffer.is_ended());
    Ok(())
}

#[test]
fn document_loads_block_until_parsing_finishes() -> TestResult {
    init_logging();
    let (stylesheet, evaluator) = fixtures::document_copy("extra.xml");
    let loader = TestLoader::default();
    let host = TestHost::default();
    let (transformation, buffer) = new_transformation(
        stylesheet,
        evaluator,
        "<in/>",
        config_with_method(100, OutputMethod::Xml),
    )?;
    let mut transformation = transformation
        .with_loader(Box::new(loader.clone()))
        .with_host(Box::new(host.clone()));

    assert_eq!(transformation.step()?, Status::Blocked);
    assert_eq!(transformation.state(), TransformationState::Blocked);
    assert_eq!(transformation.step()?, Status::Blocked);
    let (handle, uri) = loader.log.borrow().requested[0].clone();
    assert_eq!(uri.as_str(), "extra.xml");
    assert_eq!(loader.log.borrow().requested.len(), 1);

    let tree = parse_document("<extra a=\"1\">more</extra>")?;
    transformation.parsing_finished(handle, Some(Box::new(tree)))?;
    assert_eq!(*host.continued.borrow(), 1);
    assert_eq!(transformation.state(), TransformationState::Paused);

    assert_eq!(transformation.run()?, Status::Finished);
    assert_eq!(
        buffer.contents(),
        r#"<loaded><extra a="1">more</extra></loaded>"#
    );
    Ok(())
}

#[test]
fn failed_loads_leave_the_document_absent() -> TestResult {
    init_logging();
    let (stylesheet, evaluator) = fixtures::document_copy("broken.xml");
    let loader = TestLoader::default();
    let (transformation, buffer) = new_transformation(
        stylesheet,
        evaluator,
        "<in/>",
        config_with_method(100, OutputMethod::Text),
    )?;
    let mut transformation = transformation.with_loader(Box::new(loader.clone()));

    assert_eq!(transformation.step()?, Status::Blocked);
    transformation.parsing_finished(1, None)?;
    assert_eq!(transformation.run()?, Status::Finished);
    assert_eq!(buffer.contents(), "missing");

    assert!(transformation.parsing_finished(1, None).is_err());
    Ok(())
}

#[test]
fn without_a_loader_documents_are_absent() -> TestResult {
    init_logging();
    let (stylesheet, evaluator) = fixtures::document_copy("nowhere.xml");
    let (mut transformation, buffer) = new_transformation(
        stylesheet,
        evaluator,
        "<in/>",
        config_with_method(100, OutputMethod::Text),
    )?;
    assert_eq!(transformation.run()?, Status::Finished);
    assert_eq!(buffer.contents(), "missing");

    let (stylesheet, evaluator) = fixtures::document_copy("nowhere.xml");
    let refusing = TestLoader {
        refuse: true,
        ..TestLoader::default()
    };
    let (transformation, buffer) = new_transformation(
        stylesheet,
        evaluator,
        "<in/>",
        config_with_method(100, OutputMethod::Text),
    )?;
    let mut transformation = transformation.with_loader(Box::new(refusing));
    assert_eq!(transformation.run()?, Status::Finished);
    assert_eq!(buffer.contents(), "missing");
    Ok(())
}

#[test]
fn dropping_a_blocked_transformation_cancels_its_loads() -> TestResult {
    init_logging();
    let (stylesheet, evaluator) = fixtures::document_copy("slow.xml");
    let loader = TestLoader::default();
    let (transformation, _) = new_transformation(
        stylesheet,
        evaluator,
        "<in/>",
        config_with_method(100, OutputMethod::Xml),
    )?;
    let mut transformation = transformation.with_loader(Box::new(loader.clone()));
    assert_eq!(transformation.step()?, Status::Blocked);
    drop(transformation);
    assert_eq!(loader.log.borrow().cancelled, vec![1]);
    Ok(())
}

#[test]
fn messages_reach_the_host() -> TestResult {
    init_logging();
    let (stylesheet, evaluator) = fixtures::chatty(false);
    let host = TestHost::default();
    let (transformation, _) = new_transformation(
        stylesheet,
        evaluator,
        "<in/>",
        config_with_method(100, OutputMethod::Text),
    )?;
    let mut transformation = transformation.with_host(Box::new(host.clone()));
    assert_eq!(transformation.run()?, Status::Finished);

    let messages = host.messages.borrow();
    assert_eq!(
        *messages,
        vec![
            (MessageKind::Message, "hello".to_string()),
            (MessageKind::Message, "bye".to_string()),
        ]
    );
    assert_eq!(transformation.diagnostics().len(), 2);
    Ok(())
}

#[test]
fn terminating_messages_fail_the_transformation() -> TestResult {
    init_logging();
    let (stylesheet, evaluator) = fixtures::chatty(true);
    let host = TestHost::default();
    let (transformation, buffer) = new_transformation(
        stylesheet,
        evaluator,
        "<in/>",
        config_with_method(100, OutputMethod::Text),
    )?;
    let mut transformation = transformation.with_host(Box::new(host.clone()));

    let error = transformation.run().expect_err("terminate stops the run");
    assert!(matches!(error, TransformError::Terminated { ref message } if message == "bye"));
    assert_eq!(transformation.state(), TransformationState::Failed);
    assert!(transformation.step().is_err());
    assert_eq!(buffer.contents(), "ok");

    let kinds: Vec<_> = host.messages.borrow().iter().map(|(kind, _)| *kind).collect();
    assert_eq!(
        kinds,
        vec![MessageKind::Message, MessageKind::Message, MessageKind::Error]
    );
    Ok(())
}

#[test]
fn parameters_override_defaults_before_the_first_step() -> TestResult {
    init_logging();
    let (stylesheet, evaluator) = fixtures::mode_parameter();
    let (mut transformation, buffer) = new_transformation(
        stylesheet,
        evaluator,
        "<in/>",
        config_with_method(100, OutputMethod::Text),
    )?;
    assert_eq!(transformation.run()?, Status::Finished);
    assert_eq!(buffer.contents(), "mode=light");

    let (stylesheet, evaluator) = fixtures::mode_parameter();
    let (mut transformation, buffer) = new_transformation(
        stylesheet,
        evaluator,
        "<in/>",
        config_with_method(1, OutputMethod::Text),
    )?;
    transformation.set_parameter("mode", Value::String("dark".into()))?;
    assert_eq!(transformation.step()?, Status::Paused);
    assert!(matches!(
        transformation.set_parameter("mode", Value::String("dim".into())),
        Err(TransformError::InvalidState { .. })
    ));
    run_to_end(&mut transformation)?;
    assert_eq!(buffer.contents(), "mode=dark");
    Ok(())
}

#[test]
fn tee_writes_the_same_output_to_a_file() -> TestResult {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("copy.xml");
    let (stylesheet, evaluator) = fixtures::order_report(false);
    let mut settings = config(3);
    settings.tee_path = Some(path.clone());
    let (mut transformation, buffer) = new_transformation(stylesheet, evaluator, ORDERS, settings)?;
    run_to_end(&mut transformation)?;

    let copy = std::fs::read_to_string(&path)?;
    assert!(!copy.is_empty());
    assert_eq!(copy, buffer.contents());
    Ok(())
}

#[test]
fn token_targets_receive_markup_events() -> TestResult {
    init_logging();
    let (stylesheet, evaluator) = fixtures::item_keys();
    let tokens = TokenCollector::new();
    let mut transformation = Transformation::new(
        Arc::new(stylesheet),
        Box::new(evaluator),
        Box::new(parse_document(fixtures::ITEMS)?),
        OutputTarget::Tokens(Box::new(tokens.clone())),
        TransformConfig::default(),
    )?;
    assert_eq!(transformation.run()?, Status::Finished);
    assert!(!tokens.is_empty());
    assert_eq!(tokens.to_markup()?, "[a][c]||");
    Ok(())
}

#[test]
fn configuration_loads_from_json() -> TestResult {
    let json = serde_json::json!({
        "instruction_budget": 5,
        "defer_output_decision": true,
        "output": { "method": "text" },
    });
    let settings = TransformConfig::from_json(&json.to_string())?;
    assert_eq!(settings.instruction_budget, 5);
    assert!(settings.defer_output_decision);
    assert_eq!(
        settings.output.as_ref().and_then(|output| output.method),
        Some(OutputMethod::Text)
    );
    assert!(TransformConfig::from_json(r#"{ "instruction_budget": 0 }"#).is_err());
    Ok(())
}

#[test]
fn transform_to_string_runs_to_completion() -> TestResult {
    init_logging();
    let (stylesheet, evaluator) = fixtures::chatty(false);
    let mut settings = config(2);
    settings.defer_output_decision = true;
    let (output, diagnostics) = transform_to_string(
        Arc::new(stylesheet),
        Box::new(evaluator),
        Box::new(parse_document("<in/>")?),
        settings,
    )?;
    assert_eq!(output, "ok");
    assert_eq!(diagnostics.len(), 2);

    let (stylesheet, evaluator) = fixtures::html_page();
    let (output, _) = transform_to_string(
        Arc::new(stylesheet),
        Box::new(evaluator),
        Box::new(parse_document("<in/>")?),
        config(1),
    )?;
    assert!(output.starts_with("<HTML>"));
    Ok(())
}
