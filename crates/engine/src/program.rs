//! The compiled program model: instructions, per-program tables and a
//! builder with forward-referencing labels.

use crate::error::TransformError;
use serde::{Deserialize, Serialize};
use std::fmt;
use xsltvm_types::QualifiedName;

macro_rules! index_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub usize);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

index_type!(
    /// A program in [`Stylesheet::programs`](crate::Stylesheet).
    ProgramId
);
index_type!(
    /// A compiled expression owned by the evaluator.
    ExprId
);
index_type!(
    /// A compiled pattern owned by the evaluator.
    PatternId
);
index_type!(VariableId);
index_type!(KeyId);
index_type!(SortId);
index_type!(NumberId);
index_type!(StringId);
index_type!(NameId);
index_type!(NamespaceScopeId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgramKind {
    Root,
    Template,
    /// Per-mode dispatch: match patterns, call the winning template.
    ApplyTemplates,
    ForEach,
    GlobalVariable,
    KeyIndex,
}

/// Where `SetVariable` and `SetWithParam` take their value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueSource {
    Expression(ExprId),
    /// The scratch string.
    String,
    /// The fragment built by the last `EndCollectFragment`.
    Fragment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortParameter {
    Order,
    Lang,
    DataType,
    CaseOrder,
}

/// One interpreter step.
///
/// Name operands of `None` mean the scratch name. Text-producing
/// instructions consume the scratch string. Jump targets are absolute
/// instruction indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    EvaluateToNumber(ExprId),
    EvaluateToBoolean(ExprId),
    /// Appends the string value to the scratch string.
    EvaluateToString(ExprId),
    /// Snapshots a node-set into the frame's node list.
    EvaluateToNodes(ExprId),
    /// Sets the scratch boolean to whether any of the patterns match.
    MatchPatterns(Vec<PatternId>),

    SetString(StringId),
    AppendString(StringId),
    SetName(NameId),
    /// Parses the scratch string as a QName; jumps to `on_invalid` if it is not one.
    SetQName { on_invalid: usize },
    SetUri,
    ResolveName {
        scope: NamespaceScopeId,
        use_default: bool,
    },
    SetNameFromNode,

    StartElement(Option<NameId>),
    AddNamespace(NamespaceScopeId),
    AddAttribute(Option<NameId>),
    AddText { disable_output_escaping: bool },
    AddComment,
    AddProcessingInstruction,
    EndElement(Option<NameId>),
    CopyOf(ExprId),
    /// Shallow copy of the context node. Element and root copies continue
    /// into the body; other nodes are copied whole and jump to `end`.
    CopyNode { end: usize },
    EndCopy,

    CallProgramOnNode {
        program: ProgramId,
        new_scope: bool,
        copy_context: bool,
    },
    CallProgramOnNodes {
        program: ProgramId,
        new_scope: bool,
    },
    /// Runs the dispatch program for a mode over the frame's node list.
    ApplyTemplates(ProgramId),
    ApplyBuiltinTemplate,
    Return,

    Jump(usize),
    JumpIfTrue(usize),
    JumpIfFalse(usize),

    StartCollectText,
    EndCollectText,
    StartCollectFragment,
    EndCollectFragment,

    Sort(SortId),
    SetSortParameter {
        sort: SortId,
        key: usize,
        parameter: SortParameter,
    },
    AddFormattedNumber(NumberId),
    CountAndAddNumber(NumberId),

    TestParamPreset(VariableId),
    SetVariable {
        variable: VariableId,
        source: ValueSource,
    },
    SetWithParam {
        variable: VariableId,
        source: ValueSource,
    },
    StartCollectParams,
    ResetCollectedParams,

    SendMessage { terminate: bool },
    Error(StringId),
    ProcessKey(KeyId),
}

impl Instruction {
    pub fn jump_target(&self) -> Option<usize> {
        match self {
            Instruction::Jump(target)
            | Instruction::JumpIfTrue(target)
            | Instruction::JumpIfFalse(target)
            | Instruction::SetQName { on_invalid: target }
            | Instruction::CopyNode { end: target } => Some(*target),
            _ => None,
        }
    }
}

/// A namespace binding in a compiled scope; `prefix` is `None` for the default namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceBinding {
    pub prefix: Option<String>,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub kind: ProgramKind,
    pub description: String,
    pub instructions: Vec<Instruction>,
    pub strings: Vec<String>,
    pub names: Vec<QualifiedName>,
    pub namespaces: Vec<Vec<NamespaceBinding>>,
}

impl Program {
    pub fn string(&self, id: StringId) -> Result<&str, TransformError> {
        self.strings
            .get(id.0)
            .map(String::as_str)
            .ok_or_else(|| TransformError::program(format!("{} out of range in {}", id, self)))
    }

    pub fn name(&self, id: NameId) -> Result<&QualifiedName, TransformError> {
        self.names
            .get(id.0)
            .ok_or_else(|| TransformError::program(format!("{} out of range in {}", id, self)))
    }

    pub fn namespace_scope(&self, id: NamespaceScopeId) -> Result<&[NamespaceBinding], TransformError> {
        self.namespaces
            .get(id.0)
            .map(Vec::as_slice)
            .ok_or_else(|| TransformError::program(format!("{} out of range in {}", id, self)))
    }

    /// Checks the operands that index into this program's own tables.
    pub fn validate(&self) -> Result<(), TransformError> {
        if self.instructions.is_empty() {
            return Err(TransformError::program(format!("{} has no instructions", self)));
        }
        for (index, instruction) in self.instructions.iter().enumerate() {
            if let Some(target) = instruction.jump_target()
                && target > self.instructions.len()
            {
                return Err(TransformError::program(format!(
                    "jump target {} of instruction {} is outside {}",
                    target, index, self
                )));
            }
            match instruction {
                Instruction::SetString(id) | Instruction::AppendString(id) | Instruction::Error(id) => {
                    self.string(*id)?;
                }
                Instruction::SetName(id)
                | Instruction::StartElement(Some(id))
                | Instruction::AddAttribute(Some(id))
                | Instruction::EndElement(Some(id)) => {
                    self.name(*id)?;
                }
                Instruction::ResolveName { scope, .. } | Instruction::AddNamespace(scope) => {
                    self.namespace_scope(*scope)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            write!(f, "{:?} program", self.kind)
        } else {
            write!(f, "{:?} program '{}'", self.kind, self.description)
        }
    }
}

/// A forward-referencable position in a program under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Assembles a [`Program`], resolving labels when it is built.
#[derive(Debug)]
pub struct ProgramBuilder {
    program: Program,
    labels: Vec<Option<usize>>,
    fixups: Vec<(usize, Label)>,
}

impl ProgramBuilder {
    pub fn new(kind: ProgramKind, description: impl Into<String>) -> Self {
        Self {
            program: Program {
                kind,
                description: description.into(),
                instructions: Vec::new(),
                strings: Vec::new(),
                names: Vec::new(),
                namespaces: Vec::new(),
            },
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    pub fn push(&mut self, instruction: Instruction) -> &mut Self {
        self.program.instructions.push(instruction);
        self
    }

    /// Index the next pushed instruction will get.
    pub fn position(&self) -> usize {
        self.program.instructions.len()
    }

    pub fn string(&mut self, value: impl Into<String>) -> StringId {
        let value = value.into();
        if let Some(index) = self.program.strings.iter().position(|s| *s == value) {
            return StringId(index);
        }
        self.program.strings.push(value);
        StringId(self.program.strings.len() - 1)
    }

    pub fn name(&mut self, name: QualifiedName) -> NameId {
        if let Some(index) = self.program.names.iter().position(|n| *n == name) {
            return NameId(index);
        }
        self.program.names.push(name);
        NameId(self.program.names.len() - 1)
    }

    pub fn namespace_scope(&mut self, bindings: Vec<NamespaceBinding>) -> NamespaceScopeId {
        self.program.namespaces.push(bindings);
        NamespaceScopeId(self.program.namespaces.len() - 1)
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the next instruction.
    pub fn place(&mut self, label: Label) -> &mut Self {
        if let Some(slot) = self.labels.get_mut(label.0) {
            *slot = Some(self.program.instructions.len());
        }
        self
    }

    /// Pushes a jump-like instruction whose target is resolved from `label`.
    /// `make` receives a placeholder target.
    pub fn push_to(&mut self, make: impl FnOnce(usize) -> Instruction, label: Label) -> &mut Self {
        self.fixups.push((self.program.instructions.len(), label));
        self.program.instructions.push(make(usize::MAX));
        self
    }

    pub fn jump(&mut self, label: Label) -> &mut Self {
        self.push_to(Instruction::Jump, label)
    }

    pub fn jump_if_true(&mut self, label: Label) -> &mut Self {
        self.push_to(Instruction::JumpIfTrue, label)
    }

    pub fn jump_if_false(&mut self, label: Label) -> &mut Self {
        self.push_to(Instruction::JumpIfFalse, label)
    }

    /// Pushes `SetString` + `AddText` for a literal.
    pub fn text(&mut self, text: impl Into<String>) -> &mut Self {
        let id = self.string(text);
        self.push(Instruction::SetString(id))
            .push(Instruction::AddText {
                disable_output_escaping: false,
            })
    }

    /// Pushes a literal element start.
    pub fn start_element(&mut self, name: impl Into<QualifiedName>) -> &mut Self {
        let id = self.name(name.into());
        self.push(Instruction::StartElement(Some(id)))
    }

    pub fn end_element(&mut self, name: impl Into<QualifiedName>) -> &mut Self {
        let id = self.name(name.into());
        self.push(Instruction::EndElement(Some(id)))
    }

    /// Pushes a literal attribute.
    pub fn attribute(&mut self, name: impl Into<QualifiedName>, value: impl Into<String>) -> &mut Self {
        let name = self.name(name.into());
        let value = self.string(value);
        self.push(Instruction::SetString(value))
            .push(Instruction::AddAttribute(Some(name)))
    }

    pub fn build(mut self) -> Result<Program, TransformError> {
        for (index, label) in std::mem::take(&mut self.fixups) {
            let target = self
                .labels
                .get(label.0)
                .copied()
                .flatten()
                .ok_or_else(|| {
                    TransformError::program(format!(
                        "label used by instruction {} of {} was never placed",
                        index, self.program
                    ))
                })?;
            let instruction = &mut self.program.instructions[index];
            match instruction {
                Instruction::Jump(t)
                | Instruction::JumpIfTrue(t)
                | Instruction::JumpIfFalse(t)
                | Instruction::SetQName { on_invalid: t }
                | Instruction::CopyNode { end: t } => *t = target,
                _ => {
                    return Err(TransformError::program(format!(
                        "instruction {} does not take a label",
                        index
                    )));
                }
            }
        }
        self.program.validate()?;
        Ok(self.program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_resolve_forward_and_backward() {
        let mut builder = ProgramBuilder::new(ProgramKind::Template, "loop");
        let top = builder.label();
        let end = builder.label();
        builder.place(top);
        builder.push(Instruction::EvaluateToBoolean(ExprId(0)));
        builder.jump_if_false(end);
        builder.text("x");
        builder.jump(top);
        builder.place(end);
        builder.push(Instruction::Return);
        let program = builder.build().unwrap();
        assert_eq!(program.instructions[1], Instruction::JumpIfFalse(5));
        assert_eq!(program.instructions[4], Instruction::Jump(0));
    }

    #[test]
    fn unplaced_label_is_an_error() {
        let mut builder = ProgramBuilder::new(ProgramKind::Template, "broken");
        let nowhere = builder.label();
        builder.jump(nowhere);
        assert!(matches!(builder.build(), Err(TransformError::Program(_))));
    }

    #[test]
    fn tables_are_interned() {
        let mut builder = ProgramBuilder::new(ProgramKind::Root, "");
        let a = builder.string("a");
        let b = builder.string("b");
        assert_eq!(builder.string("a"), a);
        assert_ne!(a, b);
        let n = builder.name(QualifiedName::new("p"));
        assert_eq!(builder.name(QualifiedName::new("p")), n);
    }

    #[test]
    fn out_of_range_operands_fail_validation() {
        let program = Program {
            kind: ProgramKind::Template,
            description: "bad".into(),
            instructions: vec![Instruction::SetString(StringId(3)), Instruction::Return],
            strings: vec![],
            names: vec![],
            namespaces: vec![],
        };
        assert!(program.validate().is_err());
    }

    #[test]
    fn programs_round_trip_through_json() {
        let mut builder = ProgramBuilder::new(ProgramKind::Template, "t");
        builder.start_element("p").text("hi").end_element("p");
        builder.push(Instruction::Return);
        let program = builder.build().unwrap();
        let json = serde_json::to_string(&program).unwrap();
        let back: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(back, program);
    }
}
