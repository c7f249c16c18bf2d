//! The compiled stylesheet: programs plus the declaration tables their
//! instructions refer to.

use crate::error::TransformError;
use crate::number::NumberSpec;
use crate::program::{
    ExprId, Instruction, KeyId, NumberId, PatternId, Program, ProgramId, ProgramKind, SortId,
    VariableId,
};
use crate::sort::SortSpec;
use std::sync::Arc;
use xsltvm_output::OutputSpecification;
use xsltvm_types::QualifiedName;

#[derive(Debug, Clone)]
pub struct VariableDecl {
    pub name: QualifiedName,
    /// Top-level variables and parameters are computed lazily by running
    /// `program` against the root of the main input.
    pub global: bool,
    pub program: Option<ProgramId>,
}

#[derive(Debug, Clone)]
pub struct KeyDefinition {
    pub name: String,
    pub match_patterns: Vec<PatternId>,
    pub use_expr: ExprId,
}

#[derive(Debug, Clone)]
pub struct Stylesheet {
    pub programs: Vec<Arc<Program>>,
    pub root: ProgramId,
    pub variables: Vec<VariableDecl>,
    pub keys: Vec<KeyDefinition>,
    pub sorts: Vec<SortSpec>,
    pub numbers: Vec<NumberSpec>,
    pub output: OutputSpecification,
}

impl Stylesheet {
    pub fn program(&self, id: ProgramId) -> Result<&Arc<Program>, TransformError> {
        self.programs
            .get(id.0)
            .ok_or_else(|| TransformError::program(format!("unknown {}", id)))
    }

    pub fn variable(&self, id: VariableId) -> Result<&VariableDecl, TransformError> {
        self.variables
            .get(id.0)
            .ok_or_else(|| TransformError::program(format!("unknown {}", id)))
    }

    pub fn key(&self, id: KeyId) -> Result<&KeyDefinition, TransformError> {
        self.keys
            .get(id.0)
            .ok_or_else(|| TransformError::program(format!("unknown {}", id)))
    }

    pub fn sort(&self, id: SortId) -> Result<&SortSpec, TransformError> {
        self.sorts
            .get(id.0)
            .ok_or_else(|| TransformError::program(format!("unknown {}", id)))
    }

    pub fn number(&self, id: NumberId) -> Result<&NumberSpec, TransformError> {
        self.numbers
            .get(id.0)
            .ok_or_else(|| TransformError::program(format!("unknown {}", id)))
    }

    /// Key definitions sharing `name`, which together form one index.
    pub fn keys_named<'s>(&'s self, name: &'s str) -> impl Iterator<Item = KeyId> + 's {
        self.keys
            .iter()
            .enumerate()
            .filter(move |(_, key)| key.name == name)
            .map(|(index, _)| KeyId(index))
    }

    /// Checks every cross-table reference before execution starts.
    pub fn validate(&self) -> Result<(), TransformError> {
        let root = self.program(self.root)?;
        if root.kind != ProgramKind::Root {
            return Err(TransformError::program(format!(
                "{} is not a root program",
                root
            )));
        }
        for decl in &self.variables {
            match (decl.global, decl.program) {
                (true, Some(program)) => {
                    self.program(program)?;
                }
                (true, None) => {
                    return Err(TransformError::program(format!(
                        "global variable '{}' has no program",
                        decl.name
                    )));
                }
                _ => {}
            }
        }
        for sort in &self.sorts {
            if sort.keys.is_empty() {
                return Err(TransformError::program("sort without keys"));
            }
        }
        for program in &self.programs {
            program.validate()?;
            for instruction in &program.instructions {
                match instruction {
                    Instruction::CallProgramOnNode { program: id, .. }
                    | Instruction::CallProgramOnNodes { program: id, .. }
                    | Instruction::ApplyTemplates(id) => {
                        self.program(*id)?;
                    }
                    Instruction::Sort(id) => {
                        self.sort(*id)?;
                    }
                    Instruction::SetSortParameter { sort, key, .. } => {
                        if *key >= self.sort(*sort)?.keys.len() {
                            return Err(TransformError::program(format!(
                                "sort key {} out of range for {}",
                                key, sort
                            )));
                        }
                    }
                    Instruction::AddFormattedNumber(id) | Instruction::CountAndAddNumber(id) => {
                        self.number(*id)?;
                    }
                    Instruction::TestParamPreset(id)
                    | Instruction::SetVariable { variable: id, .. }
                    | Instruction::SetWithParam { variable: id, .. } => {
                        self.variable(*id)?;
                    }
                    Instruction::ProcessKey(id) => {
                        self.key(*id)?;
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

/// Collects programs and declarations into a [`Stylesheet`].
#[derive(Debug, Default)]
pub struct StylesheetBuilder {
    programs: Vec<Arc<Program>>,
    variables: Vec<VariableDecl>,
    keys: Vec<KeyDefinition>,
    sorts: Vec<SortSpec>,
    numbers: Vec<NumberSpec>,
    output: OutputSpecification,
}

impl StylesheetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves an id so programs can refer to each other before they are built.
    pub fn reserve_program(&mut self) -> ProgramId {
        self.programs.push(Arc::new(Program {
            kind: ProgramKind::Template,
            description: "unset".into(),
            instructions: Vec::new(),
            strings: Vec::new(),
            names: Vec::new(),
            namespaces: Vec::new(),
        }));
        ProgramId(self.programs.len() - 1)
    }

    pub fn define_program(&mut self, id: ProgramId, program: Program) -> &mut Self {
        if let Some(slot) = self.programs.get_mut(id.0) {
            *slot = Arc::new(program);
        }
        self
    }

    pub fn add_program(&mut self, program: Program) -> ProgramId {
        self.programs.push(Arc::new(program));
        ProgramId(self.programs.len() - 1)
    }

    /// Declares a local variable or template parameter.
    pub fn local_variable(&mut self, name: impl Into<QualifiedName>) -> VariableId {
        self.variables.push(VariableDecl {
            name: name.into(),
            global: false,
            program: None,
        });
        VariableId(self.variables.len() - 1)
    }

    /// Declares a top-level variable whose value `program` computes. The
    /// program is given the id the declaration will receive.
    pub fn global_variable(&mut self, name: impl Into<QualifiedName>, program: ProgramId) -> VariableId {
        self.variables.push(VariableDecl {
            name: name.into(),
            global: true,
            program: Some(program),
        });
        VariableId(self.variables.len() - 1)
    }

    /// The id the next declared variable will get.
    pub fn next_variable(&self) -> VariableId {
        VariableId(self.variables.len())
    }

    pub fn key(&mut self, definition: KeyDefinition) -> KeyId {
        self.keys.push(definition);
        KeyId(self.keys.len() - 1)
    }

    pub fn sort(&mut self, spec: SortSpec) -> SortId {
        self.sorts.push(spec);
        SortId(self.sorts.len() - 1)
    }

    pub fn number(&mut self, spec: NumberSpec) -> NumberId {
        self.numbers.push(spec);
        NumberId(self.numbers.len() - 1)
    }

    pub fn output(&mut self, output: OutputSpecification) -> &mut Self {
        self.output = output;
        self
    }

    pub fn build(self, root: ProgramId) -> Result<Stylesheet, TransformError> {
        let stylesheet = Stylesheet {
            programs: self.programs,
            root,
            variables: self.variables,
            keys: self.keys,
            sorts: self.sorts,
            numbers: self.numbers,
            output: self.output,
        };
        stylesheet.validate()?;
        Ok(stylesheet)
    }
}
