//! Offline log analysis: decode a log plus its sidecar into a node arena.
//!
//! The build runs two passes over the raw bytes. The first pass counts
//! regions and messages and records per-group child counts; the second pass
//! replays the scan and materializes nodes into a single pre-sized vector,
//! handing each group a contiguous child range. Nothing reallocates, so
//! node indices are stable for the analyzer's lifetime.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::format::{default_parameters, FormatDescriptor, Parameter};
use crate::key::{MessageKey, ParameterKey, ANON_REGION_START, NAMED_REGION_START, REGION_END};
use crate::node::{Node, NodeType};
use crate::wire::{self, ByteReader};

/// Per-group bookkeeping from the counting pass. Groups are streams and
/// regions; the second pass consumes them in discovery order.
struct GroupNode {
    parent: Option<usize>,
    group_children: usize,
    message_children: usize,
}

impl GroupNode {
    fn child_count(&self) -> usize {
        self.group_children + self.message_children
    }
}

/// A decoded log: format table, raw message data and the node arena.
pub struct Analyzer {
    parameters: HashMap<ParameterKey, usize>,
    formats: HashMap<MessageKey, FormatDescriptor>,
    stream_count: usize,
    ordering: bool,
    data: Vec<u8>,
    nodes: Vec<Node>,
}

impl Analyzer {
    /// Creates an analyzer knowing the primitive parameter types.
    pub fn new() -> Self {
        Self {
            parameters: default_parameters().into_iter().collect(),
            formats: HashMap::new(),
            stream_count: 0,
            ordering: false,
            data: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// Registers a user parameter type so the sidecar can reference it.
    /// Must happen before [`read`](Self::read).
    pub fn register_parameter<T: Parameter>(&mut self) -> Result<()> {
        let key = T::key();
        if self.parameters.insert(key, T::SIZE).is_some() {
            return Err(Error::DuplicateParameter(key.0));
        }
        Ok(())
    }

    /// Reads `path` and its `.fmt` sidecar and builds the node arena,
    /// replacing any previously loaded log.
    pub fn read(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let sidecar = wire::read_format_file(path, &self.parameters)?;
        self.formats = sidecar.formats;
        self.stream_count = sidecar.stream_count;
        self.ordering = sidecar.ordering;

        self.data = fs::read(path).map_err(|source| Error::IoRead {
            path: path.to_owned(),
            source,
        })?;

        let (groups, region_count, message_count) = self.count_pass()?;
        self.build_pass(&groups, region_count, message_count)?;
        Ok(())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn stream_count(&self) -> usize {
        self.stream_count
    }

    pub fn ordering(&self) -> bool {
        self.ordering
    }

    /// The log's root node. Only valid after a successful `read`.
    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    /// Format descriptor of a message or named-region node.
    pub fn format(&self, node: &Node) -> Option<&FormatDescriptor> {
        node.format_key.and_then(|key| self.formats.get(&key))
    }

    /// Raw parameter bytes of a message node; empty for parameterless
    /// messages and non-message nodes.
    pub fn message_data(&self, node: &Node) -> &[u8] {
        match self.format(node) {
            Some(desc) if node.node_type == NodeType::Message => {
                &self.data[node.data_offset..node.data_offset + desc.message_size]
            }
            _ => &[],
        }
    }

    /// Typed access to parameter `i` of a message node. Fails when the node
    /// has no descriptor, the index is out of range, or the stored
    /// parameter type differs from `T`.
    pub fn parameter<T: Parameter>(&self, node: &Node, i: usize) -> Result<T> {
        let desc = self
            .format(node)
            .filter(|_| node.node_type == NodeType::Message)
            .ok_or(Error::ParameterMismatch { index: i })?;
        if i >= desc.parameters.len() || desc.parameters[i] != T::key() {
            return Err(Error::ParameterMismatch { index: i });
        }
        let offset = node.data_offset + desc.parameter_offset(i);
        Ok(T::read_le(&self.data[offset..offset + T::SIZE]))
    }

    /// Counting pass: sizes every group so the build pass can allocate the
    /// arena and all child ranges up front.
    fn count_pass(&self) -> Result<(Vec<GroupNode>, usize, usize)> {
        let mut groups: Vec<GroupNode> = (0..self.stream_count)
            .map(|_| GroupNode {
                parent: None,
                group_children: 0,
                message_children: 0,
            })
            .collect();
        // Innermost open group per stream; region nesting survives block
        // boundaries.
        let mut active: Vec<usize> = (0..self.stream_count).collect();
        let mut region_count = 0;
        let mut message_count = 0;

        let mut reader = ByteReader::new(&self.data);
        while !reader.is_empty() {
            let stream_index = reader.read_u64()? as usize;
            if stream_index >= self.stream_count {
                return Err(Error::MalformedLog(format!(
                    "block references stream {stream_index} of {}",
                    self.stream_count
                )));
            }
            let block_size = reader.read_u64()? as usize;
            if block_size > reader.remaining() {
                return Err(Error::MalformedLog(format!(
                    "block of {block_size} bytes exceeds the remaining {}",
                    reader.remaining()
                )));
            }
            let block_end = reader.pos() + block_size;

            while reader.pos() < block_end {
                let key = MessageKey(reader.read_u32()?);
                match key {
                    ANON_REGION_START | NAMED_REGION_START => {
                        if key == NAMED_REGION_START {
                            let inner = MessageKey(reader.read_u32()?);
                            if !self.formats.contains_key(&inner) {
                                return Err(Error::MalformedLog(format!(
                                    "named region references unknown format {}",
                                    inner.0
                                )));
                            }
                        }

                        groups[active[stream_index]].group_children += 1;
                        groups.push(GroupNode {
                            parent: Some(active[stream_index]),
                            group_children: 0,
                            message_children: 0,
                        });
                        active[stream_index] = groups.len() - 1;
                        region_count += 1;
                    }
                    REGION_END => {
                        active[stream_index] =
                            groups[active[stream_index]].parent.ok_or_else(|| {
                                Error::MalformedLog(format!(
                                    "unbalanced region end in stream {stream_index}"
                                ))
                            })?;
                    }
                    _ => {
                        let desc = self.formats.get(&key).ok_or_else(|| {
                            Error::MalformedLog(format!("unknown message key {}", key.0))
                        })?;
                        if self.ordering {
                            reader.read_bytes(8)?;
                        }
                        reader.read_bytes(desc.message_size)?;
                        groups[active[stream_index]].message_children += 1;
                        message_count += 1;
                    }
                }
            }

            if reader.pos() != block_end {
                return Err(Error::MalformedLog(format!(
                    "message crosses block boundary at byte {}",
                    reader.pos()
                )));
            }
        }

        Ok((groups, region_count, message_count))
    }

    /// Build pass: replay the scan, materializing each node into its
    /// parent's next free child slot and claiming a contiguous range for
    /// its own children.
    fn build_pass(
        &mut self,
        groups: &[GroupNode],
        region_count: usize,
        message_count: usize,
    ) -> Result<()> {
        let total = 1 + self.stream_count + region_count + message_count;
        let mut nodes = vec![Node::placeholder(); total];

        nodes[0] = Node {
            node_type: NodeType::Log,
            first_child: 1,
            child_count: self.stream_count,
            ..Node::placeholder()
        };

        // Groups were pushed in scan order, so a single cursor pairs every
        // region start with its group record.
        let mut next_group = self.stream_count;
        // Next unclaimed arena slot.
        let mut next_index = 1 + self.stream_count;

        for i in 0..self.stream_count {
            let node = &mut nodes[1 + i];
            node.node_type = NodeType::Stream;
            node.parent = Some(0);
            let c = groups[i].child_count();
            if c > 0 {
                node.first_child = next_index;
                next_index += c;
            }
        }

        let mut active: Vec<usize> = (0..self.stream_count).map(|i| 1 + i).collect();

        let mut reader = ByteReader::new(&self.data);
        while !reader.is_empty() {
            let stream_index = reader.read_u64()? as usize;
            let block_size = reader.read_u64()? as usize;
            let block_end = reader.pos() + block_size;
            let mut parent = active[stream_index];

            while reader.pos() < block_end {
                let key = MessageKey(reader.read_u32()?);
                match key {
                    ANON_REGION_START | NAMED_REGION_START => {
                        let format_key = if key == NAMED_REGION_START {
                            Some(MessageKey(reader.read_u32()?))
                        } else {
                            None
                        };

                        let slot = claim_child_slot(&mut nodes, parent);
                        nodes[slot].node_type = NodeType::Region;
                        nodes[slot].format_key = format_key;
                        nodes[slot].parent = Some(parent);

                        let c = groups[next_group].child_count();
                        next_group += 1;
                        if c > 0 {
                            nodes[slot].first_child = next_index;
                            next_index += c;
                        }

                        parent = slot;
                        active[stream_index] = slot;
                    }
                    REGION_END => {
                        parent = nodes[parent]
                            .parent
                            .expect("region balance checked in the counting pass");
                        active[stream_index] = parent;
                    }
                    _ => {
                        let message_size = self.formats[&key].message_size;

                        let slot = claim_child_slot(&mut nodes, parent);
                        nodes[slot].node_type = NodeType::Message;
                        nodes[slot].format_key = Some(key);
                        nodes[slot].parent = Some(parent);
                        if self.ordering {
                            nodes[slot].index = reader.read_u64()?;
                        }
                        nodes[slot].data_offset = reader.pos();
                        reader.read_bytes(message_size)?;
                    }
                }
            }
        }

        debug_assert_eq!(next_index, nodes.len());
        debug_assert_eq!(next_group, groups.len());
        self.nodes = nodes;
        Ok(())
    }
}

fn claim_child_slot(nodes: &mut [Node], parent: usize) -> usize {
    let slot = nodes[parent].first_child + nodes[parent].child_count;
    nodes[parent].child_count += 1;
    slot
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}
