//! The flat name → tensor blob a generator's weights are saved to and
//! loaded from.
//!
//! Names are the dotted module paths Burn reports while walking a module
//! (`body.2.attn.to_qkv.weight`). Enum variants are left out of the path,
//! so a block keeps its name whichever variant wraps it. Exporting is a
//! [`ModuleVisitor`], loading a [`ModuleMapper`].

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use burn::{
    module::{ModuleMapper, ModuleVisitor, Param},
    prelude::*,
};
use serde::{Deserialize, Serialize};

use crate::error::{GeneratorError, Result};

/// Dotted path of the module currently being walked.
#[derive(Clone, Debug, Default)]
pub struct ModulePath {
    segments: Vec<String>,
}

impl ModulePath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&mut self, name: &str, container_type: &str) {
        if !is_variant(container_type) {
            self.segments.push(name.to_string());
        }
    }

    pub fn exit(&mut self, _name: &str, container_type: &str) {
        if !is_variant(container_type) {
            self.segments.pop();
        }
    }

    pub fn current(&self) -> String {
        self.segments.join(".")
    }
}

fn is_variant(container_type: &str) -> bool {
    container_type.starts_with("Enum:")
}

/// One persisted tensor: row-major `f32` values and their shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl StoredTensor {
    pub fn from_tensor<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Self> {
        let shape = tensor.dims().to_vec();
        let data = tensor
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|err| GeneratorError::TensorData(format!("{err:?}")))?;
        Ok(Self { shape, data })
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn to_tensor<B: Backend, const D: usize>(&self, device: &B::Device) -> Tensor<B, D> {
        Tensor::from_data(TensorData::new(self.data.clone(), self.shape.clone()), device)
    }

    fn check(&self, name: &str) -> Result<()> {
        if self.data.len() != self.numel() {
            return Err(GeneratorError::CorruptTensor {
                name: name.to_string(),
                expected: self.numel(),
                actual: self.data.len(),
            });
        }
        Ok(())
    }
}

/// Flat name → tensor mapping, the persisted form of a generator's weights.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    parameters: BTreeMap<String, StoredTensor>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: StoredTensor) -> Option<StoredTensor> {
        self.parameters.insert(name.into(), tensor)
    }

    pub fn get(&self, name: &str) -> Option<&StoredTensor> {
        self.parameters.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<StoredTensor> {
        self.parameters.remove(name)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StoredTensor)> {
        self.parameters.iter().map(|(name, tensor)| (name.as_str(), tensor))
    }

    /// Total number of scalar values.
    pub fn numel(&self) -> usize {
        self.parameters.values().map(StoredTensor::numel).sum()
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let params: Self = serde_json::from_reader(reader)?;
        params.check()?;
        Ok(params)
    }

    pub fn save_bincode<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    pub fn load_bincode<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let params: Self = bincode::deserialize_from(reader)?;
        params.check()?;
        Ok(params)
    }

    /// JSON for `.json` files, bincode otherwise.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        log::info!("saving {} parameters to {}", self.len(), path.display());
        if is_json(path) {
            self.save_json(path)
        } else {
            self.save_bincode(path)
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let params = if is_json(path) {
            Self::load_json(path)?
        } else {
            Self::load_bincode(path)?
        };
        log::info!("loaded {} parameters from {}", params.len(), path.display());
        Ok(params)
    }

    fn check(&self) -> Result<()> {
        self.parameters.iter().try_for_each(|(name, tensor)| tensor.check(name))
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Copies every visited tensor into a [`ParameterSet`].
#[derive(Debug, Default)]
pub struct ParameterExporter {
    path: ModulePath,
    params: ParameterSet,
    error: Option<GeneratorError>,
}

impl ParameterExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Result<ParameterSet> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.params),
        }
    }

    fn record<B: Backend, const D: usize>(&mut self, tensor: Tensor<B, D>) -> Result<()> {
        let name = self.path.current();
        let stored = StoredTensor::from_tensor(tensor)?;
        if self.params.insert(name.clone(), stored).is_some() {
            return Err(GeneratorError::DuplicateParameter(name));
        }
        Ok(())
    }
}

impl<B: Backend> ModuleVisitor<B> for ParameterExporter {
    fn enter_module(&mut self, name: &str, container_type: &str) {
        self.path.enter(name, container_type);
    }

    fn exit_module(&mut self, name: &str, container_type: &str) {
        self.path.exit(name, container_type);
    }

    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        if self.error.is_none() {
            if let Err(err) = self.record(param.val()) {
                self.error = Some(err);
            }
        }
    }
}

/// Replaces every visited tensor with the blob entry of the same name.
///
/// The first missing name or shape mismatch is kept and reported by
/// [`ParameterImporter::finish`], together with entries never visited.
#[derive(Debug)]
pub struct ParameterImporter<'a> {
    path: ModulePath,
    params: &'a ParameterSet,
    consumed: BTreeSet<String>,
    error: Option<GeneratorError>,
}

impl<'a> ParameterImporter<'a> {
    pub fn new(params: &'a ParameterSet) -> Self {
        Self {
            path: ModulePath::new(),
            params,
            consumed: BTreeSet::new(),
            error: None,
        }
    }

    pub fn finish(self) -> Result<()> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let unused: Vec<String> = self
            .params
            .names()
            .filter(|name| !self.consumed.contains(*name))
            .map(str::to_string)
            .collect();
        if unused.is_empty() {
            Ok(())
        } else {
            Err(GeneratorError::UnexpectedParameters(unused))
        }
    }

    fn lookup<B: Backend, const D: usize>(&mut self, tensor: &Tensor<B, D>) -> Result<Tensor<B, D>> {
        let name = self.path.current();
        let stored = self
            .params
            .get(&name)
            .ok_or_else(|| GeneratorError::MissingParameter(name.clone()))?;
        let expected = tensor.dims().to_vec();
        if stored.shape != expected {
            return Err(GeneratorError::ShapeMismatch {
                name,
                expected,
                found: stored.shape.clone(),
            });
        }
        let loaded = stored.to_tensor(&tensor.device());
        self.consumed.insert(name);
        Ok(loaded)
    }
}

impl<B: Backend> ModuleMapper<B> for ParameterImporter<'_> {
    fn enter_module(&mut self, name: &str, container_type: &str) {
        self.path.enter(name, container_type);
    }

    fn exit_module(&mut self, name: &str, container_type: &str) {
        self.path.exit(name, container_type);
    }

    fn map_float<const D: usize>(&mut self, param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
        let (id, tensor, mapper) = param.consume();
        if self.error.is_some() {
            return Param::from_mapped_value(id, tensor, mapper);
        }
        match self.lookup(&tensor) {
            Ok(loaded) => Param::from_mapped_value(id, loaded, mapper),
            Err(err) => {
                self.error = Some(err);
                Param::from_mapped_value(id, tensor, mapper)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn stored_tensor_keeps_shape_and_values() {
        let device = Default::default();
        let tensor = Tensor::<TestBackend, 2>::from_data([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]], &device);
        let stored = StoredTensor::from_tensor(tensor).unwrap();
        assert_eq!(stored.shape, vec![2, 3]);
        assert_eq!(stored.data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let back: Tensor<TestBackend, 2> = stored.to_tensor(&device);
        assert_eq!(back.dims(), [2, 3]);
    }

    #[test]
    fn corrupt_entries_are_rejected() {
        let mut params = ParameterSet::new();
        params.insert(
            "conv.weight",
            StoredTensor {
                shape: vec![2, 2],
                data: vec![0.0; 3],
            },
        );
        assert!(matches!(params.check(), Err(GeneratorError::CorruptTensor { .. })));
    }

    #[test]
    fn module_path_skips_enum_variants() {
        let mut path = ModulePath::new();
        path.enter("body", "Vec");
        path.enter("0", "Vec");
        path.enter("Hybrid", "Enum:BodyBlock");
        path.enter("attn", "Struct:HybridPerceptionBlock");
        assert_eq!(path.current(), "body.0.attn");

        path.exit("attn", "Struct:HybridPerceptionBlock");
        path.exit("Hybrid", "Enum:BodyBlock");
        assert_eq!(path.current(), "body.0");
    }
}
