//! Native object graphs.
//!
//! [`Object`] is the in-memory side of a conversion: primitives, shared
//! lists and maps, and instances of custom native types. Lists, maps and
//! native instances are reference-counted handles, so an object graph may
//! share sub-objects and may even contain itself.

use crate::node::NodeId;
use indexmap::IndexMap;
use std::any::{Any, TypeId};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use std::thread::LocalKey;

/// Instance of a custom native type.
///
/// Implemented for every `'static` type with `Debug` and `PartialEq`;
/// converters declare which of these types they handle via [`TypeRef`].
pub trait NativeObject: Any + fmt::Debug {
    fn as_any(&self) -> &dyn Any;

    fn into_any_rc(self: Rc<Self>) -> Rc<dyn Any>;

    /// Fully-qualified runtime type name, e.g. `my_crate::geo::Point`.
    fn type_name(&self) -> &'static str;

    fn dyn_eq(&self, other: &dyn NativeObject) -> bool;
}

impl<T: Any + fmt::Debug + PartialEq> NativeObject for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn dyn_eq(&self, other: &dyn NativeObject) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }
}

fn address<T: ?Sized>(rc: &Rc<T>) -> usize {
    Rc::as_ptr(rc) as *const () as usize
}

type Visiting<K> = RefCell<Vec<K>>;

thread_local! {
    /// Containers being formatted on this thread.
    static FORMATTING: Visiting<usize> = const { RefCell::new(Vec::new()) };
    /// Container pairs being compared on this thread.
    static COMPARING: Visiting<(usize, usize)> = const { RefCell::new(Vec::new()) };
}

/// Run `f` with `key` marked as visited. Returns `None` without running `f`
/// when `key` is already being visited further up the stack.
fn visit<K, R>(
    visiting: &'static LocalKey<Visiting<K>>,
    key: K,
    f: impl FnOnce() -> R,
) -> Option<R>
where
    K: Copy + PartialEq + 'static,
{
    let entered = visiting.with(|stack| {
        let mut stack = stack.borrow_mut();
        if stack.contains(&key) {
            return false;
        }
        stack.push(key);
        true
    });
    if !entered {
        return None;
    }

    struct Leave<K: Copy + PartialEq + 'static> {
        visiting: &'static LocalKey<Visiting<K>>,
        key: K,
    }

    impl<K: Copy + PartialEq + 'static> Drop for Leave<K> {
        fn drop(&mut self) {
            self.visiting.with(|stack| {
                let mut stack = stack.borrow_mut();
                if let Some(pos) = stack.iter().rposition(|k| *k == self.key) {
                    stack.remove(pos);
                }
            });
        }
    }

    let _leave = Leave { visiting, key };
    Some(f())
}

// =============================================================================
// Shared containers
// =============================================================================

/// Shared, mutable list.
#[derive(Clone, Default)]
pub struct ListRef(Rc<RefCell<Vec<Object>>>);

impl ListRef {
    pub fn new(items: Vec<Object>) -> Self {
        Self(Rc::new(RefCell::new(items)))
    }

    pub fn borrow(&self) -> Ref<'_, Vec<Object>> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Vec<Object>> {
        self.0.borrow_mut()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Object> {
        self.0.borrow().get(index).cloned()
    }

    pub fn push(&self, item: Object) {
        self.0.borrow_mut().push(item);
    }

    pub fn set(&self, index: usize, item: Object) {
        if let Some(slot) = self.0.borrow_mut().get_mut(index) {
            *slot = item;
        }
    }

    pub fn ptr_eq(&self, other: &ListRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Snapshot of the current elements.
    pub fn to_vec(&self) -> Vec<Object> {
        self.0.borrow().clone()
    }

    fn address(&self) -> usize {
        address(&self.0)
    }
}

impl fmt::Debug for ListRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match visit(&FORMATTING, self.address(), || {
            f.debug_list().entries(self.0.borrow().iter()).finish()
        }) {
            Some(result) => result,
            None => f.write_str("[...]"),
        }
    }
}

/// Shared, mutable string-keyed map.
#[derive(Clone, Default)]
pub struct MapRef(Rc<RefCell<IndexMap<String, Object>>>);

impl MapRef {
    pub fn new(entries: IndexMap<String, Object>) -> Self {
        Self(Rc::new(RefCell::new(entries)))
    }

    pub fn borrow(&self) -> Ref<'_, IndexMap<String, Object>> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, IndexMap<String, Object>> {
        self.0.borrow_mut()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn get(&self, key: &str) -> Option<Object> {
        self.0.borrow().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: Object) {
        self.0.borrow_mut().insert(key.into(), value);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.borrow().contains_key(key)
    }

    pub fn ptr_eq(&self, other: &MapRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Snapshot of the current entries.
    pub fn entries(&self) -> Vec<(String, Object)> {
        self.0
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn address(&self) -> usize {
        address(&self.0)
    }
}

impl fmt::Debug for MapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match visit(&FORMATTING, self.address(), || {
            f.debug_map().entries(self.0.borrow().iter()).finish()
        }) {
            Some(result) => result,
            None => f.write_str("{...}"),
        }
    }
}

// =============================================================================
// Object
// =============================================================================

/// A value of a native object graph.
#[derive(Clone)]
pub enum Object {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(ListRef),
    Map(MapRef),
    Native(Rc<dyn NativeObject>),
    /// Back-reference to a tree node whose conversion has not finished yet.
    ///
    /// Only observed by converters while a cyclic tree is being loaded; the
    /// pipeline replaces it in every list or map slot it was stored in
    /// before the load returns.
    Pending(NodeId),
}

impl Object {
    pub fn native<T: NativeObject>(value: T) -> Self {
        Object::Native(Rc::new(value))
    }

    pub fn list(items: impl IntoIterator<Item = Object>) -> Self {
        Object::List(ListRef::new(items.into_iter().collect()))
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Object)>) -> Self {
        Object::Map(MapRef::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Short description of the kind of value, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Object::Null => "null",
            Object::Bool(_) => "bool",
            Object::Int(_) => "int",
            Object::Float(_) => "float",
            Object::String(_) => "string",
            Object::Bytes(_) => "bytes",
            Object::List(_) => "list",
            Object::Map(_) => "map",
            Object::Native(n) => n.type_name(),
            Object::Pending(_) => "pending",
        }
    }

    /// Address identifying shared values (lists, maps, native instances).
    /// Primitives have no identity.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Object::List(l) => Some(l.address()),
            Object::Map(m) => Some(m.address()),
            Object::Native(n) => Some(address(n)),
            _ => None,
        }
    }

    /// True when both values are the same shared instance.
    pub fn same_instance(&self, other: &Object) -> bool {
        match (self.identity(), other.identity()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    pub fn as_native(&self) -> Option<&dyn NativeObject> {
        match self {
            Object::Native(n) => Some(n.as_ref()),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_native()?.as_any().downcast_ref::<T>()
    }

    /// Shared handle to a native instance of type `T`.
    pub fn downcast_rc<T: Any>(&self) -> Option<Rc<T>> {
        match self {
            Object::Native(n) => n.clone().into_any_rc().downcast::<T>().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Object::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Object::Float(f) => Some(*f),
            Object::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListRef> {
        match self {
            Object::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapRef> {
        match self {
            Object::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Object::Pending(_))
    }

    /// Build raw structured data from JSON.
    pub fn from_json(value: &serde_json::Value) -> Object {
        use serde_json::Value;
        match value {
            Value::Null => Object::Null,
            Value::Bool(b) => Object::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Object::Int(i),
                None => Object::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Object::String(s.clone()),
            Value::Array(items) => Object::list(items.iter().map(Object::from_json)),
            Value::Object(entries) => Object::map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Object::from_json(v))),
            ),
        }
    }

    /// Render raw structured data as JSON. Returns `None` when the graph
    /// is cyclic or contains native instances, pending references or bytes.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        self.to_json_guarded(&mut Vec::new())
    }

    fn to_json_guarded(&self, path: &mut Vec<usize>) -> Option<serde_json::Value> {
        use serde_json::Value;
        let identity = self.identity();
        if let Some(id) = identity {
            if path.contains(&id) {
                return None;
            }
            path.push(id);
        }
        let value = match self {
            Object::Null => Value::Null,
            Object::Bool(b) => Value::Bool(*b),
            Object::Int(i) => Value::from(*i),
            Object::Float(f) => Value::from(*f),
            Object::String(s) => Value::String(s.clone()),
            Object::List(l) => Value::Array(
                l.borrow()
                    .iter()
                    .map(|item| item.to_json_guarded(path))
                    .collect::<Option<Vec<_>>>()?,
            ),
            Object::Map(m) => Value::Object(
                m.borrow()
                    .iter()
                    .map(|(k, v)| v.to_json_guarded(path).map(|v| (k.clone(), v)))
                    .collect::<Option<serde_json::Map<_, _>>>()?,
            ),
            Object::Bytes(_) | Object::Native(_) | Object::Pending(_) => return None,
        };
        if identity.is_some() {
            path.pop();
        }
        Some(value)
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Object::Null, Object::Null) => true,
            (Object::Bool(a), Object::Bool(b)) => a == b,
            (Object::Int(a), Object::Int(b)) => a == b,
            (Object::Float(a), Object::Float(b)) => a == b,
            (Object::String(a), Object::String(b)) => a == b,
            (Object::Bytes(a), Object::Bytes(b)) => a == b,
            // A pair already being compared further up is assumed equal, so
            // cyclic graphs compare by structure.
            (Object::List(a), Object::List(b)) => {
                a.ptr_eq(b)
                    || visit(&COMPARING, (a.address(), b.address()), || {
                        *a.borrow() == *b.borrow()
                    })
                    .unwrap_or(true)
            }
            (Object::Map(a), Object::Map(b)) => {
                a.ptr_eq(b)
                    || visit(&COMPARING, (a.address(), b.address()), || {
                        *a.borrow() == *b.borrow()
                    })
                    .unwrap_or(true)
            }
            (Object::Native(a), Object::Native(b)) => Rc::ptr_eq(a, b) || a.dyn_eq(b.as_ref()),
            (Object::Pending(a), Object::Pending(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Null => f.write_str("Null"),
            Object::Bool(b) => write!(f, "Bool({b})"),
            Object::Int(i) => write!(f, "Int({i})"),
            Object::Float(x) => write!(f, "Float({x})"),
            Object::String(s) => write!(f, "String({s:?})"),
            Object::Bytes(b) => write!(f, "Bytes(len={})", b.len()),
            Object::List(l) => write!(f, "List({l:?})"),
            Object::Map(m) => write!(f, "Map({m:?})"),
            Object::Native(n) => write!(f, "Native({n:?})"),
            Object::Pending(id) => write!(f, "Pending({id:?})"),
        }
    }
}

impl From<bool> for Object {
    fn from(v: bool) -> Self {
        Object::Bool(v)
    }
}

impl From<i64> for Object {
    fn from(v: i64) -> Self {
        Object::Int(v)
    }
}

impl From<f64> for Object {
    fn from(v: f64) -> Self {
        Object::Float(v)
    }
}

impl From<&str> for Object {
    fn from(v: &str) -> Self {
        Object::String(v.to_string())
    }
}

impl From<String> for Object {
    fn from(v: String) -> Self {
        Object::String(v)
    }
}

impl From<Vec<Object>> for Object {
    fn from(v: Vec<Object>) -> Self {
        Object::List(ListRef::new(v))
    }
}

impl From<IndexMap<String, Object>> for Object {
    fn from(v: IndexMap<String, Object>) -> Self {
        Object::Map(MapRef::new(v))
    }
}

// =============================================================================
// Type references
// =============================================================================

/// Reference to a native type handled by a converter.
///
/// `Named` references are resolved lazily against the runtime type name of
/// candidate objects, which lets a converter declare types of optional
/// dependencies without linking them.
#[derive(Debug, Clone)]
pub enum TypeRef {
    Native { id: TypeId, name: &'static str },
    Named(String),
}

impl TypeRef {
    pub fn of<T: Any>() -> Self {
        TypeRef::Native {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            TypeRef::Native { name, .. } => name,
            TypeRef::Named(name) => name,
        }
    }

    /// Direct references are always well formed; names must be non-empty
    /// and free of whitespace.
    pub fn is_well_formed(&self) -> bool {
        match self {
            TypeRef::Native { .. } => true,
            TypeRef::Named(name) => {
                !name.is_empty() && !name.chars().any(|c| c.is_whitespace() || c.is_control())
            }
        }
    }

    /// Check whether `object` is an instance of the referenced type.
    pub fn matches(&self, object: &dyn NativeObject) -> bool {
        match self {
            TypeRef::Native { id, .. } => object.as_any().type_id() == *id,
            TypeRef::Named(name) => object.type_name() == name,
        }
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TypeRef::Native { id: a, .. }, TypeRef::Native { id: b, .. }) => a == b,
            (TypeRef::Named(a), TypeRef::Named(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for TypeRef {}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Point {
        x: i64,
        y: i64,
    }

    #[test]
    fn test_native_downcast() {
        let obj = Object::native(Point { x: 1, y: 2 });
        assert_eq!(obj.downcast_ref::<Point>(), Some(&Point { x: 1, y: 2 }));
        assert!(obj.downcast_ref::<String>().is_none());

        let rc = obj.downcast_rc::<Point>().unwrap();
        assert_eq!(rc.x, 1);
        assert!(obj.kind().ends_with("Point"));
    }

    #[test]
    fn test_native_equality() {
        let a = Object::native(Point { x: 1, y: 2 });
        let b = Object::native(Point { x: 1, y: 2 });
        let c = Object::native(Point { x: 3, y: 2 });
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!a.same_instance(&b));
        assert!(a.same_instance(&a.clone()));
    }

    #[test]
    fn test_map_equality_ignores_order() {
        let a = Object::map([("x", Object::Int(1)), ("y", Object::Int(2))]);
        let b = Object::map([("y", Object::Int(2)), ("x", Object::Int(1))]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_type_ref_matching() {
        let point = Point { x: 0, y: 0 };
        assert!(TypeRef::of::<Point>().matches(&point));
        assert!(TypeRef::named(std::any::type_name::<Point>()).matches(&point));
        assert!(!TypeRef::named("other_crate::Point").matches(&point));
        assert!(!TypeRef::of::<String>().matches(&point));
    }

    #[test]
    fn test_type_ref_well_formed() {
        assert!(TypeRef::of::<Point>().is_well_formed());
        assert!(TypeRef::named("geo::Point").is_well_formed());
        assert!(!TypeRef::named("").is_well_formed());
        assert!(!TypeRef::named("geo:: Point").is_well_formed());
    }

    #[test]
    fn test_json_round_trip_of_raw_data() {
        let json = serde_json::json!({"a": [1, 2.5, "x", null, true], "b": {}});
        let obj = Object::from_json(&json);
        assert_eq!(obj.to_json(), Some(json));
    }

    #[test]
    fn test_to_json_rejects_native() {
        let obj = Object::list([Object::native(Point { x: 0, y: 0 })]);
        assert_eq!(obj.to_json(), None);
    }

    fn cyclic_list(first: i64) -> ListRef {
        let list = ListRef::new(vec![Object::Int(first)]);
        list.push(Object::List(list.clone()));
        list
    }

    #[test]
    fn test_cyclic_list_is_not_json() {
        let list = cyclic_list(1);
        assert_eq!(Object::List(list.clone()).to_json(), None);
        list.borrow_mut().clear();
    }

    #[test]
    fn test_shared_list_is_json() {
        let shared = Object::list([Object::Int(1)]);
        let obj = Object::list([shared.clone(), shared]);
        assert_eq!(obj.to_json(), Some(serde_json::json!([[1], [1]])));
    }

    #[test]
    fn test_cyclic_containers_debug() {
        let list = cyclic_list(1);
        assert_eq!(format!("{list:?}"), "[Int(1), List([...])]");

        let map = MapRef::default();
        map.insert("self", Object::Map(map.clone()));
        assert_eq!(format!("{map:?}"), r#"{"self": Map({...})}"#);

        list.borrow_mut().clear();
        map.borrow_mut().clear();
    }

    #[test]
    fn test_cyclic_lists_compare_by_structure() {
        let (a, b, c) = (cyclic_list(1), cyclic_list(1), cyclic_list(2));
        assert_eq!(Object::List(a.clone()), Object::List(b.clone()));
        assert_ne!(Object::List(a.clone()), Object::List(c.clone()));
        for list in [a, b, c] {
            list.borrow_mut().clear();
        }
    }

    #[test]
    fn test_list_identity() {
        let list = ListRef::new(vec![Object::Int(1)]);
        let a = Object::List(list.clone());
        let b = Object::List(list);
        assert!(a.same_instance(&b));
        assert!(!Object::Int(1).same_instance(&Object::Int(1)));
    }
}
