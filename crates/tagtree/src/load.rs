//! Tagged trees to native objects.
//!
//! Nodes are converted bottom-up: a converter sees its node's children
//! already converted. A node that is reached again while it is still being
//! converted (a cycle through tagged nodes) is represented by
//! [`Object::Pending`] in the container slot that refers to it; the slot is
//! patched with the node's result as soon as that result exists. Deferred
//! conversions are completed last, in the order their placeholders were
//! emitted, once every slot has been patched.

use crate::error::{ConversionError, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use tagtree_core::{
    ListRef, MapRef, Node, NodeId, NodeValue, Object, Scalar, TagUri, WarningCategory, Warnings,
};
use tagtree_extension::{ConverterProxy, Deferred, FromTree, SerializationContext};
use tracing::debug;

/// Convert a tagged tree to an object graph.
///
/// Tags without a converter are not an error: their nodes are converted to
/// raw lists, maps and primitives, and an unresolved-tag warning is
/// recorded once per distinct tag unless
/// `suppress_unresolved_tag_warnings` is set.
pub fn from_tree(
    node: &Node,
    ctx: &SerializationContext,
    warnings: &mut Warnings,
) -> Result<Object> {
    let mut loader = Loader {
        ctx,
        warnings,
        done: HashMap::new(),
        in_progress: HashSet::new(),
        pending: HashMap::new(),
        deferred: VecDeque::new(),
        unresolved: HashSet::new(),
    };
    let obj = loader.convert(node)?;
    loader.complete()?;

    Ok(match obj {
        Object::Pending(id) => loader.done.get(&id).cloned().unwrap_or(Object::Pending(id)),
        obj => obj,
    })
}

/// A container slot holding a back-reference to an unfinished node.
enum Slot {
    Seq(ListRef, usize),
    Map(MapRef, String),
}

struct Completion {
    tag: TagUri,
    converter: &'static str,
    deferred: Deferred,
}

struct Loader<'a> {
    ctx: &'a SerializationContext,
    warnings: &'a mut Warnings,
    done: HashMap<NodeId, Object>,
    in_progress: HashSet<NodeId>,
    pending: HashMap<NodeId, Vec<Slot>>,
    deferred: VecDeque<Completion>,
    unresolved: HashSet<TagUri>,
}

impl Loader<'_> {
    fn convert(&mut self, node: &Node) -> Result<Object> {
        let id = node.id();
        if let Some(obj) = self.done.get(&id) {
            return Ok(obj.clone());
        }
        if self.in_progress.contains(&id) {
            return Ok(Object::Pending(id));
        }

        let ctx = self.ctx;
        let tag = node.tag();
        let converter = tag
            .as_ref()
            .and_then(|t| ctx.registry().converter_for_tag(t));

        match (tag, converter) {
            (Some(tag), Some(converter)) => {
                self.in_progress.insert(id);
                let raw = self.convert_value(node, None)?;
                let result = self.call_converter(converter, raw, tag)?;
                self.in_progress.remove(&id);
                self.finish(id, result.clone());
                Ok(result)
            }
            (tag, _) => {
                // Raw containers are their own result, so they are
                // registered before their children are visited.
                let raw = self.convert_value(node, Some(id))?;
                if let Some(tag) = tag {
                    self.unresolved_tag(tag);
                }
                Ok(raw)
            }
        }
    }

    /// Convert the content of `node` to a raw value. With `register`, the
    /// raw value is recorded as the node's final result.
    fn convert_value(&mut self, node: &Node, register: Option<NodeId>) -> Result<Object> {
        let value = node.value().clone();
        let raw = match value {
            NodeValue::Scalar(scalar) => scalar_to_object(scalar),
            NodeValue::Sequence(items) => {
                let list = ListRef::new(Vec::with_capacity(items.len()));
                if let Some(id) = register {
                    self.finish(id, Object::List(list.clone()));
                }
                for (index, item) in items.iter().enumerate() {
                    let child = self.convert(item)?;
                    if let Object::Pending(target) = child {
                        self.pending
                            .entry(target)
                            .or_default()
                            .push(Slot::Seq(list.clone(), index));
                    }
                    list.push(child);
                }
                return Ok(Object::List(list));
            }
            NodeValue::Mapping(entries) => {
                let map = MapRef::default();
                if let Some(id) = register {
                    self.finish(id, Object::Map(map.clone()));
                }
                for (key, item) in entries.iter() {
                    let child = self.convert(item)?;
                    if let Object::Pending(target) = child {
                        self.pending
                            .entry(target)
                            .or_default()
                            .push(Slot::Map(map.clone(), key.clone()));
                    }
                    map.insert(key.clone(), child);
                }
                return Ok(Object::Map(map));
            }
        };
        if let Some(id) = register {
            self.finish(id, raw.clone());
        }
        Ok(raw)
    }

    fn call_converter(
        &mut self,
        converter: &ConverterProxy,
        raw: Object,
        tag: TagUri,
    ) -> Result<Object> {
        let converted = converter.from_tree(raw, &tag, self.ctx).map_err(|source| {
            ConversionError::converter(Some(&tag), converter.class_name(), source)
        })?;

        debug!(converter = converter.class_name(), tag = %tag, "Converted tagged node");

        Ok(match converted {
            FromTree::Ready(obj) => obj,
            FromTree::Deferred(mut deferred) => {
                let placeholder = deferred.emit_placeholder();
                self.deferred.push_back(Completion {
                    tag,
                    converter: converter.class_name(),
                    deferred,
                });
                placeholder
            }
        })
    }

    /// Record the result of a node and patch every slot waiting for it.
    fn finish(&mut self, id: NodeId, result: Object) {
        if let Some(slots) = self.pending.remove(&id) {
            for slot in slots {
                match slot {
                    Slot::Seq(list, index) => list.set(index, result.clone()),
                    Slot::Map(map, key) => map.insert(key, result.clone()),
                }
            }
        }
        self.done.insert(id, result);
    }

    fn unresolved_tag(&mut self, tag: TagUri) {
        if self.ctx.options().suppress_unresolved_tag_warnings {
            return;
        }
        if self.unresolved.insert(tag.clone()) {
            self.warnings.warn(
                WarningCategory::UnresolvedTag,
                format!("{tag} is not recognized, converting to raw data structure"),
            );
        }
    }

    /// Drive every deferred conversion to completion, first emitted first.
    fn complete(&mut self) -> Result<()> {
        while let Some(mut completion) = self.deferred.pop_front() {
            completion.deferred.finish().map_err(|source| {
                ConversionError::converter(Some(&completion.tag), completion.converter, source)
            })?;
        }
        Ok(())
    }
}

fn scalar_to_object(scalar: Scalar) -> Object {
    match scalar {
        Scalar::Null => Object::Null,
        Scalar::Bool(b) => Object::Bool(b),
        Scalar::Int(i) => Object::Int(i),
        Scalar::Float(f) => Object::Float(f),
        Scalar::String(s) => Object::String(s),
        Scalar::Binary(b) => Object::Bytes(b),
    }
}
