//! Variable bindings: a scope arena for locals and lazily computed globals.

use crate::error::TransformError;
use crate::program::VariableId;
use crate::value::Value;
use std::collections::HashMap;
use std::rc::Rc;
use xsltvm_types::QualifiedName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

#[derive(Debug)]
struct Scope {
    parent: Option<ScopeId>,
    bindings: Vec<(VariableId, Rc<Value>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GlobalState {
    /// The global's program is running; a lookup now is circular.
    Computing,
    Ready(Rc<Value>),
}

/// Local scopes form chains through `parent`: a for-each body sees the
/// bindings of the template that contains it. Scopes are recycled when
/// their frame returns.
#[derive(Debug, Default)]
pub struct VariableStore {
    scopes: Vec<Option<Scope>>,
    free: Vec<usize>,
    globals: HashMap<VariableId, GlobalState>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_scope(&mut self, parent: Option<ScopeId>) -> Result<ScopeId, TransformError> {
        let scope = Scope {
            parent,
            bindings: Vec::new(),
        };
        if let Some(index) = self.free.pop() {
            self.scopes[index] = Some(scope);
            return Ok(ScopeId(index));
        }
        self.scopes.try_reserve(1)?;
        self.scopes.push(Some(scope));
        Ok(ScopeId(self.scopes.len() - 1))
    }

    pub fn pop_scope(&mut self, scope: ScopeId) {
        if let Some(slot) = self.scopes.get_mut(scope.0)
            && slot.take().is_some()
        {
            self.free.push(scope.0);
        }
    }

    /// Binds `variable` in `scope`, shadowing an earlier binding of the same
    /// variable in that scope.
    pub fn bind(
        &mut self,
        scope: ScopeId,
        variable: VariableId,
        value: Rc<Value>,
    ) -> Result<(), TransformError> {
        let scope = self
            .scopes
            .get_mut(scope.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| TransformError::program("binding into a released scope"))?;
        if let Some(binding) = scope.bindings.iter_mut().find(|(id, _)| *id == variable) {
            binding.1 = value;
        } else {
            scope.bindings.try_reserve(1)?;
            scope.bindings.push((variable, value));
        }
        Ok(())
    }

    /// Finds `variable` in `scope` or the scopes it chains to.
    pub fn lookup(&self, scope: Option<ScopeId>, variable: VariableId) -> Option<Rc<Value>> {
        let mut current = scope;
        while let Some(id) = current {
            let scope = self.scopes.get(id.0)?.as_ref()?;
            if let Some((_, value)) = scope.bindings.iter().find(|(v, _)| *v == variable) {
                return Some(Rc::clone(value));
            }
            current = scope.parent;
        }
        None
    }

    pub fn live_scopes(&self) -> usize {
        self.scopes.iter().filter(|s| s.is_some()).count()
    }

    pub fn global(&self, variable: VariableId) -> Option<&GlobalState> {
        self.globals.get(&variable)
    }

    pub fn begin_global(&mut self, variable: VariableId) {
        self.globals.insert(variable, GlobalState::Computing);
    }

    pub fn set_global(&mut self, variable: VariableId, value: Rc<Value>) {
        self.globals.insert(variable, GlobalState::Ready(value));
    }

    pub fn is_computing(&self, variable: VariableId) -> bool {
        matches!(self.globals.get(&variable), Some(GlobalState::Computing))
    }
}

/// `xsl:with-param` values collected for one call, matched to the callee's
/// parameters by expanded name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSet {
    values: Vec<(QualifiedName, Rc<Value>)>,
}

impl ParamSet {
    pub fn bind(&mut self, name: QualifiedName, value: Rc<Value>) -> Result<(), TransformError> {
        if let Some(entry) = self
            .values
            .iter_mut()
            .find(|(n, _)| n.same_expanded_name(&name))
        {
            entry.1 = value;
        } else {
            self.values.try_reserve(1)?;
            self.values.push((name, value));
        }
        Ok(())
    }

    pub fn get(&self, name: &QualifiedName) -> Option<Rc<Value>> {
        self.values
            .iter()
            .find(|(n, _)| n.same_expanded_name(name))
            .map(|(_, value)| Rc::clone(value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string(s: &str) -> Rc<Value> {
        Rc::new(Value::String(s.into()))
    }

    #[test]
    fn lookup_walks_the_scope_chain() {
        let mut store = VariableStore::new();
        let template = store.push_scope(None).unwrap();
        let body = store.push_scope(Some(template)).unwrap();
        store.bind(template, VariableId(0), string("outer")).unwrap();
        store.bind(body, VariableId(1), string("inner")).unwrap();

        assert_eq!(store.lookup(Some(body), VariableId(0)), Some(string("outer")));
        assert_eq!(store.lookup(Some(body), VariableId(1)), Some(string("inner")));
        assert_eq!(store.lookup(Some(template), VariableId(1)), None);
        assert_eq!(store.lookup(None, VariableId(0)), None);
    }

    #[test]
    fn inner_bindings_shadow_outer_ones() {
        let mut store = VariableStore::new();
        let outer = store.push_scope(None).unwrap();
        let inner = store.push_scope(Some(outer)).unwrap();
        store.bind(outer, VariableId(0), string("a")).unwrap();
        store.bind(inner, VariableId(0), string("b")).unwrap();
        assert_eq!(store.lookup(Some(inner), VariableId(0)), Some(string("b")));
        assert_eq!(store.lookup(Some(outer), VariableId(0)), Some(string("a")));
    }

    #[test]
    fn released_scopes_are_reused() {
        let mut store = VariableStore::new();
        let first = store.push_scope(None).unwrap();
        store.bind(first, VariableId(0), string("x")).unwrap();
        store.pop_scope(first);
        assert_eq!(store.live_scopes(), 0);
        assert!(store.bind(first, VariableId(0), string("y")).is_err());

        let second = store.push_scope(None).unwrap();
        assert_eq!(second, first);
        assert_eq!(store.lookup(Some(second), VariableId(0)), None);
    }

    #[test]
    fn globals_move_from_computing_to_ready() {
        let mut store = VariableStore::new();
        assert!(store.global(VariableId(3)).is_none());
        store.begin_global(VariableId(3));
        assert!(store.is_computing(VariableId(3)));
        store.set_global(VariableId(3), string("v"));
        assert_eq!(
            store.global(VariableId(3)),
            Some(&GlobalState::Ready(string("v")))
        );
    }

    #[test]
    fn params_match_by_expanded_name() {
        let mut params = ParamSet::default();
        let name = QualifiedName::with_namespace(Some("p".into()), "x", Some("urn:a".into()));
        params.bind(name, string("1")).unwrap();
        let other_prefix = QualifiedName::with_namespace(Some("q".into()), "x", Some("urn:a".into()));
        assert_eq!(params.get(&other_prefix), Some(string("1")));
        assert_eq!(params.get(&QualifiedName::new("x")), None);
    }
}
