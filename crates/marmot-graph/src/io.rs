//! Model container load/save
//!
//! Models are stored as a JSON document. In external-data mode every tensor
//! payload (including those inside nested subgraphs) is written to a
//! little-endian sidecar file next to the model and replaced in the JSON by
//! an offset/length record; loading resolves the records back to inline
//! payloads, so in-memory models never carry `External` values.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use crate::error::{Error, Result};
use crate::graph::{Attribute, Graph};
use crate::model::Model;
use crate::tensor::{DataType, ExternalData, TensorValues};

/// Sidecar file path for a given model path
fn sidecar_path(model_path: &Path) -> PathBuf {
    model_path.with_extension("tensors")
}

/// Applies `f` to a graph and every subgraph reachable through node
/// attributes, outermost first
fn for_each_graph_mut<F: FnMut(&mut Graph) -> Result<()>>(graph: &mut Graph, f: &mut F) -> Result<()> {
    f(graph)?;
    for node in &mut graph.nodes {
        for attr in node.attributes.values_mut() {
            match attr {
                Attribute::Graph(sub) => for_each_graph_mut(sub, f)?,
                Attribute::Graphs(subs) => {
                    for sub in subs {
                        for_each_graph_mut(sub, f)?;
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Loads a model from a JSON container file
///
/// External tensor payloads are resolved against the sidecar file and
/// returned inline.
pub fn load_model(path: impl AsRef<Path>) -> Result<Model> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut model: Model = serde_json::from_reader(reader)?;

    let has_external = {
        let mut found = false;
        for_each_graph_mut(&mut model.graph, &mut |g| {
            found |= g
                .initializers
                .iter()
                .any(|t| matches!(t.values, TensorValues::External(_)));
            Ok(())
        })?;
        found
    };

    if has_external {
        let sidecar = sidecar_path(path);
        if !sidecar.exists() {
            return Err(Error::MissingExternalData(sidecar));
        }
        let data = std::fs::read(&sidecar)?;
        debug!(sidecar = %sidecar.display(), bytes = data.len(), "resolving external tensor data");
        for_each_graph_mut(&mut model.graph, &mut |g| {
            for tensor in &mut g.initializers {
                if let TensorValues::External(ext) = &tensor.values {
                    tensor.values = resolve_external(&tensor.name, ext, &data)?;
                }
            }
            Ok(())
        })?;
    }

    Ok(model)
}

/// Saves a model to a JSON container file
///
/// With `external` set, tensor payloads are written to a sidecar file next
/// to `path` and only location records are kept in the JSON document.
pub fn save_model(path: impl AsRef<Path>, model: &Model, external: bool) -> Result<()> {
    let path = path.as_ref();

    if external {
        let mut model = model.clone();
        let sidecar = sidecar_path(path);
        let mut writer = BufWriter::new(File::create(&sidecar)?);
        let mut offset = 0u64;
        for_each_graph_mut(&mut model.graph, &mut |g| {
            for tensor in &mut g.initializers {
                tensor.values = externalize(&mut writer, &mut offset, &tensor.values)?;
            }
            Ok(())
        })?;
        writer.flush()?;
        debug!(sidecar = %sidecar.display(), bytes = offset, "wrote external tensor data");
        write_json(path, &model)
    } else {
        write_json(path, model)
    }
}

fn write_json(path: &Path, model: &Model) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, model)?;
    writer.flush()?;
    Ok(())
}

fn externalize<W: Write>(
    writer: &mut W,
    offset: &mut u64,
    values: &TensorValues,
) -> Result<TensorValues> {
    let start = *offset;
    let dtype = values.dtype();
    match values {
        TensorValues::F32(v) => {
            for &x in v {
                writer.write_f32::<LittleEndian>(x)?;
            }
        }
        TensorValues::U8(v) => {
            writer.write_all(v)?;
        }
        TensorValues::I32(v) => {
            for &x in v {
                writer.write_i32::<LittleEndian>(x)?;
            }
        }
        TensorValues::I64(v) => {
            for &x in v {
                writer.write_i64::<LittleEndian>(x)?;
            }
        }
        // Already externalized; keep the record as-is.
        TensorValues::External(ext) => return Ok(TensorValues::External(ext.clone())),
    }
    let len = values.len() as u64 * dtype.byte_size() as u64;
    *offset += len;
    Ok(TensorValues::External(ExternalData {
        dtype,
        offset: start,
        len,
    }))
}

fn resolve_external(name: &str, ext: &ExternalData, data: &[u8]) -> Result<TensorValues> {
    let end = ext.offset.checked_add(ext.len).unwrap_or(u64::MAX);
    if end > data.len() as u64 {
        return Err(Error::ExternalDataRange {
            name: name.to_string(),
            offset: ext.offset,
            len: ext.len,
            available: data.len() as u64,
        });
    }
    let mut slice = &data[ext.offset as usize..end as usize];
    let count = ext.len as usize / ext.dtype.byte_size();
    Ok(match ext.dtype {
        DataType::F32 => {
            let mut out = vec![0f32; count];
            slice.read_f32_into::<LittleEndian>(&mut out)?;
            TensorValues::F32(out)
        }
        DataType::U8 => TensorValues::U8(slice.to_vec()),
        DataType::I32 => {
            let mut out = vec![0i32; count];
            slice.read_i32_into::<LittleEndian>(&mut out)?;
            TensorValues::I32(out)
        }
        DataType::I64 => {
            let mut out = vec![0i64; count];
            slice.read_i64_into::<LittleEndian>(&mut out)?;
            TensorValues::I64(out)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;
    use crate::tensor::{TensorData, ValueInfo};

    fn sample_model() -> Model {
        let mut body = Graph::new("body");
        body.add_initializer(TensorData::new_f32("inner_w", vec![2, 2], vec![0.5, -0.5, 1.0, -1.0]).unwrap());

        let mut g = Graph::new("main");
        g.add_input(ValueInfo::new("x", vec![1, 4], DataType::F32));
        g.add_initializer(TensorData::new_f32("w", vec![4, 2], (0..8).map(|i| i as f32).collect()).unwrap());
        g.add_initializer(TensorData::new_u8("mask", vec![3], vec![1, 0, 1]).unwrap());
        g.add_node(
            Node::new("if0", "If", vec!["cond".into()], vec!["z".into()])
                .with_attr("then_branch", Attribute::Graph(body)),
        );
        g.add_node(Node::new("mm", "MatMul", vec!["x".into(), "w".into()], vec!["y".into()]));
        Model::new(g).with_metadata("origin", "unit-test")
    }

    #[test]
    fn test_inline_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let model = sample_model();
        save_model(&path, &model, false).unwrap();
        let loaded = load_model(&path).unwrap();
        assert_eq!(loaded, model);
    }

    #[test]
    fn test_external_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let model = sample_model();
        save_model(&path, &model, true).unwrap();
        assert!(sidecar_path(&path).exists());

        // The JSON itself must not contain inline payloads anymore.
        let raw: Model = serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        for t in &raw.graph.initializers {
            assert!(matches!(t.values, TensorValues::External(_)));
        }

        // Loading resolves everything back, including subgraph tensors.
        let loaded = load_model(&path).unwrap();
        assert_eq!(loaded, model);
    }

    #[test]
    fn test_missing_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        save_model(&path, &sample_model(), true).unwrap();
        std::fs::remove_file(sidecar_path(&path)).unwrap();
        assert!(matches!(load_model(&path), Err(Error::MissingExternalData(_))));
    }

    #[test]
    fn test_truncated_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        save_model(&path, &sample_model(), true).unwrap();
        let sidecar = sidecar_path(&path);
        let data = std::fs::read(&sidecar).unwrap();
        std::fs::write(&sidecar, &data[..data.len() / 2]).unwrap();
        assert!(matches!(load_model(&path), Err(Error::ExternalDataRange { .. })));
    }
}
