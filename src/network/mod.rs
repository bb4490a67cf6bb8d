//! Sequential network: an ordered list of layers plus the descriptors
//! they were built from.

pub mod layout;
pub mod train;

pub use train::{EpochInfo, TrainDesc, TransformRanges};

use crate::errors::{NnError, NnResult};
use crate::layers::{self, Layer, LayerDesc, LayerKind, LayersCache};
use crate::scratch;
use crate::tensor::{list::TST_HEADER, Tensor, TensorList};
use crate::types::Shape;
use std::path::Path;

pub const TSN_HEADER: &[u8; 10] = b"network\0\0\0";

pub struct Network {
    pub(crate) training_mode: bool,
    pub(crate) layers: Vec<Box<dyn Layer>>,
    pub(crate) descs: Vec<LayerDesc>,
    /// Largest element count across layer outputs; working buffers are
    /// sized once from this.
    pub(crate) max_layer_size: usize,
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("training_mode", &self.training_mode)
            .field("descs", &self.descs)
            .field("max_layer_size", &self.max_layer_size)
            .finish()
    }
}

impl Network {
    /// Builds a network from descriptors. The first layer must be an input
    /// layer; every layer's output shape is fixed here and verified by a
    /// mock forward/backward pass.
    pub fn new(descs: &[LayerDesc], training_mode: bool) -> NnResult<Self> {
        if descs.is_empty() {
            return Err(NnError::Create("network needs at least one layer".into()));
        }
        if descs[0].kind() != LayerKind::Input {
            return Err(NnError::InvalidInput(
                "first layer of network must be input".into(),
            ));
        }

        let mut built: Vec<Box<dyn Layer>> = Vec::with_capacity(descs.len());
        let mut prev_shape = Shape::new(1, 1, 1);
        for desc in descs {
            let layer = layers::create(desc, prev_shape, training_mode)?;
            prev_shape = layer.out_shape();
            built.push(layer);
        }

        let max_layer_size = built
            .iter()
            .map(|l| l.out_shape().size())
            .max()
            .unwrap_or(1);

        let nn = Self {
            training_mode,
            layers: built,
            descs: descs.to_vec(),
            max_layer_size,
        };

        nn.shape_checks()?;
        Ok(nn)
    }

    /// Mock forward (and backward, in training mode) pass over zero data,
    /// verifying that every layer produces its declared shape. Gradient
    /// accumulators are cleared afterwards so the first real batch starts
    /// from zero.
    fn shape_checks(&self) -> NnResult<()> {
        let result = scratch::with(|s| -> NnResult<()> {
            let mut in_out =
                s.take_alloc(self.layers[0].out_shape(), self.max_layer_size);
            let mut cache = LayersCache::new();

            for layer in &self.layers {
                layer.forward(&mut in_out, Some(&mut cache))?;
                if in_out.shape() != layer.out_shape() {
                    let msg = format!(
                        "{} layer produced {} instead of {}",
                        layer.kind().name(),
                        in_out.shape(),
                        layer.out_shape()
                    );
                    s.put(in_out);
                    return Err(NnError::InvalidInput(msg));
                }
            }

            if self.training_mode {
                for (i, layer) in self.layers.iter().enumerate().rev() {
                    layer.backward(&mut in_out, &mut cache)?;
                    if i > 0 && in_out.shape() != self.layers[i - 1].out_shape() {
                        let msg = format!(
                            "{} layer backward produced {} instead of {}",
                            layer.kind().name(),
                            in_out.shape(),
                            self.layers[i - 1].out_shape()
                        );
                        s.put(in_out);
                        return Err(NnError::InvalidInput(msg));
                    }
                }
            }

            s.put(in_out);
            Ok(())
        });

        for layer in &self.layers {
            layer.clear_changes();
        }

        result.map_err(|e| {
            tracing::error!(error = %e, tag = e.tag(), "network shape check failed");
            e
        })
    }

    pub fn training_mode(&self) -> bool {
        self.training_mode
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn descs(&self) -> &[LayerDesc] {
        &self.descs
    }

    pub fn max_layer_size(&self) -> usize {
        self.max_layer_size
    }

    pub fn input_shape(&self) -> Shape {
        self.layers[0].out_shape()
    }

    pub fn output_shape(&self) -> Shape {
        self.layers[self.layers.len() - 1].out_shape()
    }

    /// Runs the layer chain over `input`, writing the result into `out`.
    /// `input` may be any shape with the input layer's element count.
    pub fn feedforward(&self, input: &Tensor, out: &mut Tensor) -> NnResult<()> {
        if input.len() != self.input_shape().size() {
            return Err(NnError::InvalidInput(format!(
                "input of {} elements does not match input layer {}",
                input.len(),
                self.input_shape()
            )));
        }

        scratch::with(|s| {
            let mut in_out = s.take_alloc(input.shape(), self.max_layer_size);
            let result = in_out.copy_from(input).and_then(|_| {
                for layer in &self.layers {
                    layer.forward(&mut in_out, None)?;
                }
                out.copy_from(&in_out)
            });
            s.put(in_out);
            result
        })
    }

    /// Boxed type/shape table, one row per layer.
    pub fn summary(&self) -> String {
        let header = format!("network ({} layers)", self.layers.len());

        let mut rows: Vec<(String, String)> = vec![
            ("type".into(), "shape".into()),
            ("----".into(), "-----".into()),
        ];
        for layer in &self.layers {
            rows.push((
                layer.kind().name().to_string(),
                layer.out_shape().to_string(),
            ));
        }

        let type_width = rows.iter().map(|(t, _)| t.len()).max().unwrap_or(4);
        let shape_width = rows.iter().map(|(_, s)| s.len()).max().unwrap_or(5);
        let row_width = (1 + type_width + 2 + shape_width + 1).max(header.len() + 2);

        let mut out = String::new();
        out.push_str(&"-".repeat(row_width));
        out.push('\n');
        out.push_str(&format!("{:^row_width$}\n\n", header));
        for (t, s) in &rows {
            out.push_str(&format!(" {t:<type_width$}  {s:<shape_width$}\n"));
        }
        out.push_str(&"-".repeat(row_width));
        out.push('\n');
        out
    }

    /// Writes the topology as a `.tsl` layout file.
    pub fn save_layout(&self, path: impl AsRef<Path>) -> NnResult<()> {
        std::fs::write(path, layout::write_descs(&self.descs))?;
        Ok(())
    }

    /// Creates a network from a `.tsl` layout file; parameters keep their
    /// initialization values.
    pub fn load_layout(path: impl AsRef<Path>, training_mode: bool) -> NnResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let descs = layout::parse_descs(&text)?;
        Self::new(&descs, training_mode)
    }

    fn params_list(&self) -> NnResult<TensorList> {
        let mut list = TensorList::new();
        for (i, layer) in self.layers.iter().enumerate() {
            layer.save_params(&mut list, i)?;
        }
        Ok(list)
    }

    /// Writes the full model (`.tsn`): header, whitespace-stripped layout,
    /// then every layer's parameters.
    pub fn save(&self, path: impl AsRef<Path>) -> NnResult<()> {
        let layout_str: String = layout::write_descs(&self.descs)
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();

        let mut bytes = Vec::new();
        bytes.extend_from_slice(TSN_HEADER);
        bytes.extend_from_slice(layout_str.as_bytes());
        bytes.extend_from_slice(&self.params_list()?.to_bytes()?);

        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Creates a network from a `.tsn` model file, topology and
    /// parameters both.
    pub fn load(path: impl AsRef<Path>, training_mode: bool) -> NnResult<Self> {
        let bytes = std::fs::read(path)?;
        let (layout_str, params) = split_tsn(&bytes)?;

        let descs = layout::parse_descs(layout_str)?;
        let mut nn = Self::new(&descs, training_mode)?;
        nn.load_params(&params)?;
        Ok(nn)
    }

    /// Populates parameters from a `.tsn` file into this network's
    /// existing topology.
    pub fn load_existing(&mut self, path: impl AsRef<Path>) -> NnResult<()> {
        let bytes = std::fs::read(path)?;
        let (_, params) = split_tsn(&bytes)?;
        self.load_params(&params)
    }

    fn load_params(&mut self, params: &TensorList) -> NnResult<()> {
        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.load_params(params, i)?;
        }
        Ok(())
    }
}

/// Splits a `.tsn` byte stream into its layout text and parameter list.
fn split_tsn(bytes: &[u8]) -> NnResult<(&str, TensorList)> {
    if bytes.len() < TSN_HEADER.len() || &bytes[..TSN_HEADER.len()] != TSN_HEADER {
        return Err(NnError::Parse("not a tsn file".into()));
    }

    let body = &bytes[TSN_HEADER.len()..];
    let tensors_at = body
        .windows(TST_HEADER.len())
        .position(|w| w == TST_HEADER)
        .ok_or_else(|| NnError::Parse("tsn file has no tensor section".into()))?;

    let layout_str = std::str::from_utf8(&body[..tensors_at])
        .map_err(|_| NnError::Parse("tsn layout section is not valid utf-8".into()))?;
    let params = TensorList::from_bytes(&body[tensors_at..])?;

    Ok((layout_str, params))
}
