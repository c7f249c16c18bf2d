use xsltvm::engine::testing::ScriptedEvaluator;
use xsltvm::engine::{
    Dependency, Eval, EvalContext, EvalError, ExprId, Instruction, KeyDefinition, NumberSpec,
    Program, ProgramBuilder, ProgramKind, SortKey, SortSpec, Stylesheet, StylesheetBuilder, Value,
    ValueSource,
};

pub fn program(kind: ProgramKind, build: impl FnOnce(&mut ProgramBuilder)) -> Program {
    let mut builder = ProgramBuilder::new(kind, format!("{:?} fixture", kind));
    build(&mut builder);
    builder.build().expect("fixture program is valid")
}

/// `<xsl:value-of select="..."/>`
pub fn value_of(builder: &mut ProgramBuilder, expr: ExprId) -> &mut ProgramBuilder {
    builder
        .push(Instruction::EvaluateToString(expr))
        .push(Instruction::AddText {
            disable_output_escaping: false,
        })
}

/// Registers `f`, suspending every other call with an external dependency
/// when `flaky` is set. A suspended call is always followed by a real one.
pub fn maybe_flaky(
    evaluator: &mut ScriptedEvaluator,
    flaky: bool,
    mut f: impl FnMut(&EvalContext<'_>) -> Result<Eval<Value>, EvalError> + 'static,
) -> ExprId {
    let mut primed = false;
    evaluator.expression(move |context| {
        if flaky && !primed {
            primed = true;
            return Ok(Eval::NotYet(Dependency::External));
        }
        primed = false;
        f(context)
    })
}

pub fn attribute_text(context: &EvalContext<'_>, local: &str) -> String {
    let trees = context.trees();
    trees
        .attributes(context.node)
        .into_iter()
        .find(|attribute| trees.name(*attribute).is_some_and(|name| name.local_name == local))
        .map(|attribute| context.string_value(attribute))
        .unwrap_or_default()
}

pub const ITEMS: &str = r#"<items><item id="1" n="a"/><item id="2" n="b"/><item id="1" n="c"/></items>"#;

/// `key('k', '1')` and `key('k', '3')` over [`ITEMS`], each hit written as
/// `[n]` and each lookup closed with `|`.
pub fn item_keys() -> (Stylesheet, ScriptedEvaluator) {
    item_keys_with(false)
}

/// [`item_keys`] whose `@id` use-expression first answers "not yet" on every
/// node when `flaky_use` is set.
pub fn item_keys_with(flaky_use: bool) -> (Stylesheet, ScriptedEvaluator) {
    let mut evaluator = ScriptedEvaluator::new();
    let item = evaluator.element_pattern("item");
    let id = if flaky_use {
        maybe_flaky(&mut evaluator, true, |context| {
            Ok(Eval::Ready(Value::String(attribute_text(context, "id"))))
        })
    } else {
        evaluator.attribute("id")
    };
    let n = evaluator.attribute("n");
    let ones = evaluator.key("k", "1");
    let threes = evaluator.key("k", "3");

    let mut builder = StylesheetBuilder::new();
    builder.key(KeyDefinition {
        name: "k".into(),
        match_patterns: vec![item],
        use_expr: id,
    });
    let hit = builder.add_program(program(ProgramKind::ForEach, |b| {
        b.text("[");
        value_of(b, n).text("]").push(Instruction::Return);
    }));
    let root = builder.add_program(program(ProgramKind::Root, |b| {
        for lookup in [ones, threes] {
            b.push(Instruction::EvaluateToNodes(lookup))
                .push(Instruction::CallProgramOnNodes {
                    program: hit,
                    new_scope: true,
                })
                .text("|");
        }
        b.push(Instruction::Return);
    }));
    (builder.build(root).expect("valid stylesheet"), evaluator)
}

pub const LETTERS: &str = "<list><item>C</item><item>A</item><item>B</item></list>";

/// Applies templates to the items of [`LETTERS`] sorted by their text.
pub fn sorted_letters(key: impl FnOnce(ExprId) -> SortKey) -> (Stylesheet, ScriptedEvaluator) {
    let mut evaluator = ScriptedEvaluator::new();
    let items = evaluator.descendants("item");
    let text = evaluator.string_value();
    let item = evaluator.element_pattern("item");

    let mut builder = StylesheetBuilder::new();
    let sort = builder.sort(SortSpec {
        keys: vec![key(text)],
    });
    let template = builder.add_program(program(ProgramKind::Template, |b| {
        b.start_element("li");
        value_of(b, text)
            .end_element("li")
            .push(Instruction::Return);
    }));
    let dispatch = builder.add_program(program(ProgramKind::ApplyTemplates, |b| {
        let builtin = b.label();
        b.push(Instruction::MatchPatterns(vec![item]))
            .jump_if_false(builtin)
            .push(Instruction::CallProgramOnNode {
                program: template,
                new_scope: true,
                copy_context: true,
            })
            .push(Instruction::Return)
            .place(builtin)
            .push(Instruction::ApplyBuiltinTemplate)
            .push(Instruction::Return);
    }));
    let root = builder.add_program(program(ProgramKind::Root, |b| {
        b.start_element("ol")
            .push(Instruction::EvaluateToNodes(items))
            .push(Instruction::Sort(sort))
            .push(Instruction::ApplyTemplates(dispatch))
            .end_element("ol")
            .push(Instruction::Return);
    }));
    (builder.build(root).expect("valid stylesheet"), evaluator)
}

pub const ORDERS: &str = r#"<orders><order id="o1" total="5"><line>pen</line><line>ink</line></order><order id="o2" total="12"><line>pad</line></order></orders>"#;

/// A report over [`ORDERS`] touching attributes, numbers, conditionals,
/// sorting and counting. With `flaky` every expression suspends once before
/// answering.
pub fn order_report(flaky: bool) -> (Stylesheet, ScriptedEvaluator) {
    let mut evaluator = ScriptedEvaluator::new();
    let orders = maybe_flaky(&mut evaluator, flaky, |context| {
        let trees = context.trees();
        let nodes = trees
            .all_nodes(context.node.tree)
            .into_iter()
            .filter(|node| trees.name(*node).is_some_and(|name| name.local_name == "order"))
            .collect();
        Ok(Eval::Ready(Value::NodeSet(nodes)))
    });
    let id = maybe_flaky(&mut evaluator, flaky, |context| {
        Ok(Eval::Ready(Value::String(attribute_text(context, "id"))))
    });
    let total = maybe_flaky(&mut evaluator, flaky, |context| {
        Ok(Eval::Ready(Value::String(attribute_text(context, "total"))))
    });
    let big = maybe_flaky(&mut evaluator, flaky, |context| {
        let total: f64 = attribute_text(context, "total").parse().unwrap_or(0.0);
        Ok(Eval::Ready(Value::Boolean(total > 10.0)))
    });
    let lines = maybe_flaky(&mut evaluator, flaky, |context| {
        let trees = context.trees();
        let nodes = trees
            .children(context.node)
            .into_iter()
            .filter(|node| trees.name(*node).is_some_and(|name| name.local_name == "line"))
            .collect();
        Ok(Eval::Ready(Value::NodeSet(nodes)))
    });
    let text = maybe_flaky(&mut evaluator, flaky, |context| {
        Ok(Eval::Ready(Value::String(context.string_value(context.node))))
    });

    let mut builder = StylesheetBuilder::new();
    let by_text = builder.sort(SortSpec {
        keys: vec![SortKey::new(text)],
    });
    let padded = builder.number(NumberSpec {
        format: "001".into(),
        ..NumberSpec::default()
    });
    let counted = builder.number(NumberSpec::default());
    let line = builder.add_program(program(ProgramKind::ForEach, |b| {
        b.start_element("line")
            .push(Instruction::CountAndAddNumber(counted))
            .text(":");
        value_of(b, text).end_element("line").push(Instruction::Return);
    }));
    let order = builder.add_program(program(ProgramKind::ForEach, |b| {
        let small = b.label();
        let id_attribute = b.name("id".into());
        b.start_element("order")
            .push(Instruction::EvaluateToString(id))
            .push(Instruction::AddAttribute(Some(id_attribute)))
            .push(Instruction::EvaluateToNumber(total))
            .push(Instruction::AddFormattedNumber(padded))
            .push(Instruction::EvaluateToBoolean(big))
            .jump_if_false(small)
            .text(" big")
            .place(small)
            .push(Instruction::EvaluateToNodes(lines))
            .push(Instruction::Sort(by_text))
            .push(Instruction::CallProgramOnNodes {
                program: line,
                new_scope: true,
            })
            .end_element("order")
            .push(Instruction::Return);
    }));
    let root = builder.add_program(program(ProgramKind::Root, |b| {
        b.start_element("report")
            .push(Instruction::EvaluateToNodes(orders))
            .push(Instruction::CallProgramOnNodes {
                program: order,
                new_scope: true,
            })
            .end_element("report")
            .push(Instruction::Return);
    }));
    (builder.build(root).expect("valid stylesheet"), evaluator)
}

/// `html/body/img` with a text node, written as literal result elements.
pub fn html_page() -> (Stylesheet, ScriptedEvaluator) {
    let mut builder = StylesheetBuilder::new();
    let root = builder.add_program(program(ProgramKind::Root, |b| {
        b.start_element("html")
            .start_element("body")
            .start_element("img")
            .attribute("src", "a.png")
            .end_element("img")
            .text("x < y")
            .end_element("body")
            .end_element("html")
            .push(Instruction::Return);
    }));
    (builder.build(root).expect("valid stylesheet"), ScriptedEvaluator::new())
}

/// Copies `document(uri)` into `<loaded>`, or writes `missing` when the
/// document is absent.
pub fn document_copy(uri: &str) -> (Stylesheet, ScriptedEvaluator) {
    let mut evaluator = ScriptedEvaluator::new();
    let document = evaluator.document(uri);
    let mut builder = StylesheetBuilder::new();
    let root = builder.add_program(program(ProgramKind::Root, |b| {
        let missing = b.label();
        let done = b.label();
        b.push(Instruction::EvaluateToBoolean(document))
            .jump_if_false(missing)
            .start_element("loaded")
            .push(Instruction::CopyOf(document))
            .end_element("loaded")
            .jump(done)
            .place(missing)
            .text("missing")
            .place(done)
            .push(Instruction::Return);
    }));
    (builder.build(root).expect("valid stylesheet"), evaluator)
}

/// A top-level `<xsl:param name="mode" select="'light'"/>` written out by
/// the root template.
pub fn mode_parameter() -> (Stylesheet, ScriptedEvaluator) {
    let mut evaluator = ScriptedEvaluator::new();
    let mut builder = StylesheetBuilder::new();
    let default_program = builder.reserve_program();
    let mode = builder.global_variable("mode", default_program);
    let read_mode = evaluator.variable(mode);
    builder.define_program(
        default_program,
        program(ProgramKind::GlobalVariable, |b| {
            let done = b.label();
            let light = b.string("light");
            b.push(Instruction::TestParamPreset(mode))
                .jump_if_true(done)
                .push(Instruction::SetString(light))
                .push(Instruction::SetVariable {
                    variable: mode,
                    source: ValueSource::String,
                })
                .place(done)
                .push(Instruction::Return);
        }),
    );
    let root = builder.add_program(program(ProgramKind::Root, |b| {
        b.text("mode=");
        value_of(b, read_mode).push(Instruction::Return);
    }));
    (builder.build(root).expect("valid stylesheet"), evaluator)
}

/// Sends `hello`, writes `ok`, then terminates with `bye`.
pub fn chatty(terminate: bool) -> (Stylesheet, ScriptedEvaluator) {
    let mut builder = StylesheetBuilder::new();
    let root = builder.add_program(program(ProgramKind::Root, |b| {
        let hello = b.string("hello");
        let bye = b.string("bye");
        b.push(Instruction::SetString(hello))
            .push(Instruction::SendMessage { terminate: false })
            .text("ok")
            .push(Instruction::SetString(bye))
            .push(Instruction::SendMessage { terminate })
            .push(Instruction::Return);
    }));
    (builder.build(root).expect("valid stylesheet"), ScriptedEvaluator::new())
}
