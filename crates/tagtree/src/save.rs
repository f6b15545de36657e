//! Native objects to tagged trees.

use crate::error::{ConversionError, Result};
use std::collections::HashMap;
use std::rc::Rc;
use tagtree_core::{NativeObject, Node, NodeValue, Object, Scalar};
use tagtree_extension::SerializationContext;
use tracing::debug;

/// Convert an object graph to a tagged tree.
///
/// Lists, maps and native instances that appear more than once become a
/// single shared node, so a graph that contains itself yields a cyclic
/// tree.
pub fn to_tree(obj: &Object, ctx: &SerializationContext) -> Result<Node> {
    Saver {
        ctx,
        memo: HashMap::new(),
    }
    .convert(obj)
}

struct Saver<'a> {
    ctx: &'a SerializationContext,
    /// Keyed by object identity. The object is held so that its address
    /// cannot be reused during the pass.
    memo: HashMap<usize, (Object, Node)>,
}

impl Saver<'_> {
    fn convert(&mut self, obj: &Object) -> Result<Node> {
        let identity = obj.identity();
        if let Some((_, node)) = identity.and_then(|id| self.memo.get(&id)) {
            return Ok(node.clone());
        }

        let node = match obj {
            Object::Null => Node::null(),
            Object::Bool(b) => Node::scalar(*b),
            Object::Int(i) => Node::scalar(*i),
            Object::Float(f) => Node::scalar(*f),
            Object::String(s) => Node::scalar(s.as_str()),
            Object::Bytes(b) => Node::scalar(Scalar::Binary(b.clone())),
            Object::List(list) => {
                let node = Node::new(NodeValue::Sequence(Vec::with_capacity(list.len())));
                self.remember(identity, obj, &node);
                for item in list.to_vec() {
                    let child = self.convert(&item)?;
                    node.push(child);
                }
                node
            }
            Object::Map(map) => {
                let node = Node::new(NodeValue::Mapping(Default::default()));
                self.remember(identity, obj, &node);
                for (key, value) in map.entries() {
                    let child = self.convert(&value)?;
                    node.insert(key, child);
                }
                node
            }
            Object::Native(native) => {
                let node = Node::null();
                self.remember(identity, obj, &node);
                self.convert_native(obj, native, &node)?;
                node
            }
            Object::Pending(_) => {
                return Err(ConversionError::Unrepresentable {
                    type_name: "unresolved back-reference".to_string(),
                });
            }
        };
        Ok(node)
    }

    fn remember(&mut self, identity: Option<usize>, obj: &Object, node: &Node) {
        if let Some(id) = identity {
            self.memo.insert(id, (obj.clone(), node.clone()));
        }
    }

    /// Fill `node`, already registered for `obj`, from the converter's output.
    fn convert_native(
        &mut self,
        obj: &Object,
        native: &Rc<dyn NativeObject>,
        node: &Node,
    ) -> Result<()> {
        let ctx = self.ctx;
        let converter = ctx
            .registry()
            .converter_for_object(native.as_ref())
            .ok_or_else(|| ConversionError::Unrepresentable {
                type_name: native.type_name().to_string(),
            })?;

        let tag = converter.select_tag(obj, ctx);
        let raw = converter.to_tree(obj, tag.as_ref(), ctx).map_err(|source| {
            ConversionError::converter(tag.as_ref(), converter.class_name(), source)
        })?;

        let invalid = match raw {
            Object::Pending(_) => true,
            Object::Native(_) => tag.is_some(),
            _ => false,
        };
        if invalid {
            return Err(ConversionError::InvalidTreeValue {
                converter: converter.class_name().to_string(),
                kind: raw.kind().to_string(),
            });
        }

        debug!(
            converter = converter.class_name(),
            tag = tag.as_ref().map(|t| t.as_str()),
            "Converted native object"
        );

        // Without a tag the output is converted again as a fresh object,
        // possibly by another converter.
        let converted = self.convert(&raw)?;
        node.assume(&converted);
        if tag.is_some() {
            node.set_tag(tag);
        }
        Ok(())
    }
}
