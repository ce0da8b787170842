//! File functions
//!
//! A tree is stored in two files.
//!
//! The structure file has the following structure
//!
//! Header
//!   [Node]
//!
//! The Header contains the number of levels in the tree, the maximum entries per node and the
//! format version. Nodes are written in preorder. Each Node is a NodeHeader (entry count and leaf
//! flag) followed by, for each entry:
//!   key size `u16`, key bytes, PayloadLocation (offset and size in the data file)
//!
//! The data file is the payload of each entry, appended in the order the entries are written.
//!
//! All integers are fixed width in native byte order.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::Result;
use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::btree::node::{Node, Occupancy};
use crate::btree::BramleyError;
use crate::record::Record;
use crate::BINCODER;

const FORMAT_VERSION_1: u8 = 1;

const SUPPORTED_VERSIONS: &[u8] = &[FORMAT_VERSION_1];

#[derive(Debug, Serialize, Deserialize)]
struct StructureHeader {
    depth: u32,
    max: u16,
    version: u8,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeHeader {
    count: u16,
    leaf: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct PayloadLocation {
    offset: u32,
    size: u32,
}

/// Writes a tree out to a structure file and data file.
#[derive(Debug)]
pub(crate) struct TreeWriter {
    structure: BufWriter<File>,
    data: BufWriter<File>,
    data_offset: u64,
    depth: usize,
    key_buf: Vec<u8>,
    payload_buf: Vec<u8>,
}

impl TreeWriter {
    /// Create (or truncate) both files.
    pub(crate) fn try_new(structure: &Path, data: &Path) -> Result<Self> {
        let open = |path: &Path| {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
        };
        Ok(Self {
            structure: BufWriter::new(open(structure)?),
            data: BufWriter::new(open(data)?),
            data_offset: 0,
            depth: 0,
            key_buf: vec![],
            payload_buf: vec![],
        })
    }

    /// Write the whole tree and return the number of levels written.
    pub(crate) fn write_tree<E: Record>(
        mut self,
        occupancy: Occupancy,
        root: Option<&Node<E>>,
    ) -> Result<usize> {
        let max = u16::try_from(occupancy.max)
            .map_err(|_| BramleyError::OrderTooLarge(occupancy.order()))?;
        let mut header = StructureHeader {
            depth: 0,
            max,
            version: FORMAT_VERSION_1,
        };
        // The depth is a placeholder until the traversal is complete
        BINCODER.serialize_into(&mut self.structure, &header)?;

        if let Some(root) = root {
            self.write_node(root, 1)?;
        }

        header.depth = u32::try_from(self.depth)?;
        self.structure.seek(SeekFrom::Start(0))?;
        BINCODER.serialize_into(&mut self.structure, &header)?;

        self.structure.flush()?;
        self.data.flush()?;
        Ok(self.depth)
    }

    fn write_node<E: Record>(&mut self, node: &Node<E>, level: usize) -> Result<()> {
        self.depth = self.depth.max(level);

        let node_header = NodeHeader {
            count: u16::try_from(node.len())?,
            leaf: node.is_leaf(),
        };
        BINCODER.serialize_into(&mut self.structure, &node_header)?;

        for entry in node.entries() {
            self.key_buf.clear();
            entry.serialize_key(&mut self.key_buf)?;
            let key_size = u16::try_from(self.key_buf.len())
                .map_err(|_| BramleyError::KeyTooLarge(self.key_buf.len()))?;
            BINCODER.serialize_into(&mut self.structure, &key_size)?;
            self.structure.write_all(&self.key_buf)?;

            self.payload_buf.clear();
            entry.serialize_payload(&mut self.payload_buf)?;
            let end = self.data_offset + self.payload_buf.len() as u64;
            if end > u64::from(u32::MAX) {
                return Err(BramleyError::DataFileTooLarge(end).into());
            }
            let location = PayloadLocation {
                offset: self.data_offset as u32,
                size: self.payload_buf.len() as u32,
            };
            self.data.write_all(&self.payload_buf)?;
            self.data_offset = end;
            BINCODER.serialize_into(&mut self.structure, &location)?;
        }

        for child in node.children() {
            self.write_node(child, level + 1)?;
        }
        Ok(())
    }
}

/// Reads a tree back from a structure file and data file.
#[derive(Debug)]
pub(crate) struct TreeReader {
    structure: BufReader<File>,
    data: BufReader<File>,
    data_position: u64,
    header: StructureHeader,
    key_buf: Vec<u8>,
    payload_buf: Vec<u8>,
}

impl TreeReader {
    /// Open both files and validate the structure header.
    pub(crate) fn try_open(structure: &Path, data: &Path) -> Result<Self> {
        let mut structure = BufReader::new(File::open(structure)?);
        let data = BufReader::new(File::open(data)?);

        let header: StructureHeader = BINCODER.deserialize_from(&mut structure)?;
        if !SUPPORTED_VERSIONS.contains(&header.version) {
            return Err(BramleyError::InvalidFileVersion(header.version).into());
        }
        if header.max < 2 {
            return Err(BramleyError::OrderTooSmall(usize::from(header.max) + 1).into());
        }

        Ok(Self {
            structure,
            data,
            data_position: 0,
            header,
            key_buf: vec![],
            payload_buf: vec![],
        })
    }

    pub(crate) fn occupancy(&self) -> Occupancy {
        Occupancy::from_max(usize::from(self.header.max))
    }

    pub(crate) fn depth(&self) -> usize {
        self.header.depth as usize
    }

    /// Read the whole tree. A depth of zero is an empty tree.
    pub(crate) fn read_tree<E: Record>(&mut self) -> Result<Option<Box<Node<E>>>> {
        if self.header.depth == 0 {
            return Ok(None);
        }
        self.read_node(1).map(Some)
    }

    fn read_node<E: Record>(&mut self, level: usize) -> Result<Box<Node<E>>> {
        let Occupancy { max, min } = self.occupancy();
        let depth = self.depth();

        let node_header: NodeHeader = BINCODER.deserialize_from(&mut self.structure)?;
        let count = usize::from(node_header.count);
        // Only the root may hold fewer than min entries
        let floor = if level == 1 { 1 } else { min };
        if count < floor || count > max {
            return Err(corrupt(format!("node at level {level} holds {count} entries")));
        }
        if node_header.leaf != (level == depth) {
            return Err(corrupt(format!(
                "leaf flag {} at level {level} of a tree with depth {depth}",
                node_header.leaf
            )));
        }

        let mut node = Node::try_new(max, node_header.leaf)?;
        for _ in 0..count {
            let key_size: u16 = BINCODER.deserialize_from(&mut self.structure)?;
            self.key_buf.resize(usize::from(key_size), 0);
            self.structure.read_exact(&mut self.key_buf)?;
            let key = E::deserialize_key(&self.key_buf)?;

            let location: PayloadLocation = BINCODER.deserialize_from(&mut self.structure)?;
            self.read_payload(&location)?;
            node.push_entry(E::deserialize_payload(key, &self.payload_buf)?);
        }

        if !node_header.leaf {
            for _ in 0..=count {
                node.push_child(self.read_node(level + 1)?);
            }
        }
        Ok(Box::new(node))
    }

    fn read_payload(&mut self, location: &PayloadLocation) -> Result<()> {
        let offset = u64::from(location.offset);
        // Payloads are usually read in the order they were written, so avoid discarding the
        // read buffer unless we have to.
        if offset != self.data_position {
            self.data.seek(SeekFrom::Start(offset))?;
        }
        self.payload_buf.resize(location.size as usize, 0);
        self.data.read_exact(&mut self.payload_buf)?;
        self.data_position = offset + u64::from(location.size);
        Ok(())
    }
}

fn corrupt(reason: String) -> anyhow::Error {
    BramleyError::Corrupt(reason).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::record::Pair;

    #[test]
    fn it_writes_header_for_empty_tree() {
        let occupancy = Occupancy::from_max(4);
        let writer = TreeWriter::try_new(
            Path::new("file_empty.idx"),
            Path::new("file_empty.dat"),
        )
        .expect("creates files");
        let depth = writer
            .write_tree::<Pair<u32, u32>>(occupancy, None)
            .expect("writes tree");
        assert_eq!(depth, 0);

        let bytes = std::fs::read("file_empty.idx").expect("reads structure");
        assert_eq!(bytes.len(), 7);
        assert_eq!(&bytes[0..4], &0u32.to_ne_bytes());
        assert_eq!(&bytes[4..6], &4u16.to_ne_bytes());
        assert_eq!(bytes[6], FORMAT_VERSION_1);

        let mut reader = TreeReader::try_open(
            Path::new("file_empty.idx"),
            Path::new("file_empty.dat"),
        )
        .expect("opens files");
        assert_eq!(reader.occupancy(), occupancy);
        assert!(reader
            .read_tree::<Pair<u32, u32>>()
            .expect("reads tree")
            .is_none());

        std::fs::remove_file("file_empty.idx").expect("cleanup");
        std::fs::remove_file("file_empty.dat").expect("cleanup");
    }

    #[test]
    fn it_lays_out_a_single_leaf() {
        let occupancy = Occupancy::from_max(2);
        let mut node = Node::try_new(2, true).expect("allocates");
        node.push_entry(Pair::new(1u16, 10u64));
        node.push_entry(Pair::new(2u16, 20u64));

        let writer = TreeWriter::try_new(
            Path::new("file_layout.idx"),
            Path::new("file_layout.dat"),
        )
        .expect("creates files");
        let depth = writer
            .write_tree(occupancy, Some(&node))
            .expect("writes tree");
        assert_eq!(depth, 1);

        let bytes = std::fs::read("file_layout.idx").expect("reads structure");
        let mut expected = vec![];
        expected.extend_from_slice(&1u32.to_ne_bytes());
        expected.extend_from_slice(&2u16.to_ne_bytes());
        expected.push(FORMAT_VERSION_1);
        expected.extend_from_slice(&2u16.to_ne_bytes());
        expected.push(1);
        for (idx, key) in [1u16, 2].iter().enumerate() {
            expected.extend_from_slice(&2u16.to_ne_bytes());
            expected.extend_from_slice(&key.to_ne_bytes());
            expected.extend_from_slice(&(idx as u32 * 8).to_ne_bytes());
            expected.extend_from_slice(&8u32.to_ne_bytes());
        }
        assert_eq!(bytes, expected);

        let data = std::fs::read("file_layout.dat").expect("reads data");
        assert_eq!(data.len(), 16);
        assert_eq!(&data[8..16], &20u64.to_ne_bytes());

        std::fs::remove_file("file_layout.idx").expect("cleanup");
        std::fs::remove_file("file_layout.dat").expect("cleanup");
    }

    #[test]
    fn it_rejects_unknown_version() {
        let mut bytes = vec![];
        bytes.extend_from_slice(&0u32.to_ne_bytes());
        bytes.extend_from_slice(&4u16.to_ne_bytes());
        bytes.push(9);
        std::fs::write("file_version.idx", bytes).expect("writes structure");
        std::fs::write("file_version.dat", b"").expect("writes data");

        let err = TreeReader::try_open(
            Path::new("file_version.idx"),
            Path::new("file_version.dat"),
        )
        .expect_err("version is rejected");
        assert!(matches!(
            err.downcast_ref::<BramleyError>(),
            Some(BramleyError::InvalidFileVersion(9))
        ));

        std::fs::remove_file("file_version.idx").expect("cleanup");
        std::fs::remove_file("file_version.dat").expect("cleanup");
    }

    #[test]
    fn it_rejects_underfull_node() {
        let occupancy = Occupancy::from_max(4);
        let mut left = Node::try_new(4, true).expect("allocates");
        left.push_entry(Pair::new(1u32, 1u32));
        let mut right = Node::try_new(4, true).expect("allocates");
        right.push_entry(Pair::new(6u32, 6u32));
        right.push_entry(Pair::new(7u32, 7u32));
        let mut root = Node::try_new(4, false).expect("allocates");
        root.push_entry(Pair::new(5u32, 5u32));
        root.push_child(Box::new(left));
        root.push_child(Box::new(right));

        let writer = TreeWriter::try_new(
            Path::new("file_underfull.idx"),
            Path::new("file_underfull.dat"),
        )
        .expect("creates files");
        writer
            .write_tree(occupancy, Some(&root))
            .expect("writes tree");

        let mut reader = TreeReader::try_open(
            Path::new("file_underfull.idx"),
            Path::new("file_underfull.dat"),
        )
        .expect("opens files");
        let err = reader
            .read_tree::<Pair<u32, u32>>()
            .expect_err("underfull node is rejected");
        assert!(matches!(
            err.downcast_ref::<BramleyError>(),
            Some(BramleyError::Corrupt(_))
        ));

        std::fs::remove_file("file_underfull.idx").expect("cleanup");
        std::fs::remove_file("file_underfull.dat").expect("cleanup");
    }

    #[test]
    fn it_rejects_leaf_at_wrong_depth() {
        let mut bytes = vec![];
        bytes.extend_from_slice(&2u32.to_ne_bytes());
        bytes.extend_from_slice(&4u16.to_ne_bytes());
        bytes.push(FORMAT_VERSION_1);
        // A root which claims to be a leaf in a two level tree
        bytes.extend_from_slice(&1u16.to_ne_bytes());
        bytes.push(1);
        std::fs::write("file_depth.idx", bytes).expect("writes structure");
        std::fs::write("file_depth.dat", b"").expect("writes data");

        let mut reader =
            TreeReader::try_open(Path::new("file_depth.idx"), Path::new("file_depth.dat"))
                .expect("opens files");
        let err = reader
            .read_tree::<Pair<u32, u32>>()
            .expect_err("depth mismatch is rejected");
        assert!(matches!(
            err.downcast_ref::<BramleyError>(),
            Some(BramleyError::Corrupt(_))
        ));

        std::fs::remove_file("file_depth.idx").expect("cleanup");
        std::fs::remove_file("file_depth.dat").expect("cleanup");
    }
}
