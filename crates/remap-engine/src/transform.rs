//! Per-variable transforms and their resolution against a source store.
//!
//! A transform is plain data: a rename, a linear combination, or a function
//! id with the names of the source variables it reads. Function ids are
//! looked up in a [`FunctionRegistry`] that is built once at start-up and
//! shared read-only by every worker, so no executable state ever has to be
//! serialized.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zarrs_filesystem::FilesystemStore;

use crate::error::{RemapError, Result};
use crate::store::{array_exists, array_info, open_array, open_store, ArrayHandle, ArrayInfo};

/// Elementwise function over equally shaped input blocks.
pub type TransformFn = Arc<dyn Fn(&[&[f32]], &mut [f32]) -> Result<()> + Send + Sync>;

/// How an output variable is derived from source variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Transform {
    /// Copy one source variable unchanged.
    Rename(String),
    /// Apply a registered function; `params` name its source variables in order.
    Function { function: String, params: Vec<String> },
    /// `offset + sum(scale * var)`.
    Linear {
        linear: Vec<LinearTerm>,
        #[serde(default)]
        offset: f64,
    },
}

/// One term of a linear transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearTerm {
    pub var: String,
    pub scale: f64,
}

impl Transform {
    /// Names of the source variables this transform reads, in order.
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            Self::Rename(name) => vec![name.as_str()],
            Self::Function { params, .. } => params.iter().map(String::as_str).collect(),
            Self::Linear { linear, .. } => linear.iter().map(|t| t.var.as_str()).collect(),
        }
    }

    /// Whether this transform copies its single input unchanged.
    pub fn is_rename(&self) -> bool {
        matches!(self, Self::Rename(_))
    }
}

/// Lookup table of transform functions by id.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, TransformFn>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding `identity`, `sum`, `difference`, `product` and `mean`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("identity", |inputs, out| {
            expect_inputs("identity", inputs, 1)?;
            out.copy_from_slice(inputs[0]);
            Ok(())
        });
        registry.register("sum", |inputs, out| {
            out.fill(0.0);
            for input in inputs {
                for (o, &v) in out.iter_mut().zip(input.iter()) {
                    *o += v;
                }
            }
            Ok(())
        });
        registry.register("difference", |inputs, out| {
            expect_inputs("difference", inputs, 2)?;
            for ((o, &a), &b) in out.iter_mut().zip(inputs[0]).zip(inputs[1]) {
                *o = a - b;
            }
            Ok(())
        });
        registry.register("product", |inputs, out| {
            out.fill(1.0);
            for input in inputs {
                for (o, &v) in out.iter_mut().zip(input.iter()) {
                    *o *= v;
                }
            }
            Ok(())
        });
        registry.register("mean", |inputs, out| {
            if inputs.is_empty() {
                return Err(RemapError::transform_failed("mean of zero inputs"));
            }
            let n = inputs.len() as f32;
            out.fill(0.0);
            for input in inputs {
                for (o, &v) in out.iter_mut().zip(input.iter()) {
                    *o += v;
                }
            }
            out.iter_mut().for_each(|o| *o /= n);
            Ok(())
        });
        registry
    }

    /// Register a function under `id`, replacing any previous entry.
    pub fn register<F>(&mut self, id: impl Into<String>, func: F)
    where
        F: Fn(&[&[f32]], &mut [f32]) -> Result<()> + Send + Sync + 'static,
    {
        self.functions.insert(id.into(), Arc::new(func));
    }

    /// Look up a function.
    pub fn get(&self, id: &str) -> Option<TransformFn> {
        self.functions.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.functions.contains_key(id)
    }
}

fn expect_inputs(name: &str, inputs: &[&[f32]], n: usize) -> Result<()> {
    if inputs.len() != n {
        return Err(RemapError::transform_failed(format!(
            "{name} takes {n} input(s), got {}",
            inputs.len()
        )));
    }
    Ok(())
}

/// A resolved, cheaply clonable operation applied to each unit.
#[derive(Clone)]
pub enum TransformOp {
    Identity,
    Linear { scales: Vec<f64>, offset: f64 },
    Function { id: String, func: TransformFn },
}

impl std::fmt::Debug for TransformOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identity => write!(f, "Identity"),
            Self::Linear { scales, offset } => f
                .debug_struct("Linear")
                .field("scales", scales)
                .field("offset", offset)
                .finish(),
            Self::Function { id, .. } => f.debug_struct("Function").field("id", id).finish(),
        }
    }
}

impl TransformOp {
    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    /// Apply the operation to input blocks laid out like `out`.
    pub fn apply(&self, inputs: &[&[f32]], out: &mut [f32]) -> Result<()> {
        if let Some(bad) = inputs.iter().find(|i| i.len() != out.len()) {
            return Err(RemapError::transform_failed(format!(
                "input block has {} elements, output block has {}",
                bad.len(),
                out.len()
            )));
        }
        match self {
            Self::Identity => {
                expect_inputs("identity", inputs, 1)?;
                out.copy_from_slice(inputs[0]);
                Ok(())
            }
            Self::Linear { scales, offset } => {
                expect_inputs("linear", inputs, scales.len())?;
                for (i, o) in out.iter_mut().enumerate() {
                    let value = inputs
                        .iter()
                        .zip(scales)
                        .fold(*offset, |acc, (input, &scale)| {
                            acc + scale * f64::from(input[i])
                        });
                    *o = value as f32;
                }
                Ok(())
            }
            Self::Function { func, .. } => func(inputs, out),
        }
    }
}

/// Source arrays of one store, opened by variable name.
#[derive(Clone)]
pub struct SourceCatalog {
    root: PathBuf,
    store: Arc<FilesystemStore>,
}

impl std::fmt::Debug for SourceCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCatalog").field("root", &self.root).finish()
    }
}

impl SourceCatalog {
    /// Open the store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let store = open_store(&root)?;
        Ok(Self { root, store })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the store holds an array with this name.
    pub fn contains(&self, name: &str) -> bool {
        array_exists(&self.root, name)
    }

    /// Open a source array.
    pub fn array(&self, name: &str) -> Result<ArrayHandle> {
        open_array(&self.store, name)
    }
}

/// A transform bound to opened source arrays.
#[derive(Clone)]
pub struct ResolvedTransform {
    pub output: String,
    pub input_names: Vec<String>,
    pub inputs: Vec<ArrayHandle>,
    pub input_infos: Vec<ArrayInfo>,
    pub op: TransformOp,
}

impl std::fmt::Debug for ResolvedTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedTransform")
            .field("output", &self.output)
            .field("input_names", &self.input_names)
            .field("op", &self.op)
            .finish()
    }
}

impl ResolvedTransform {
    /// Metadata of the first input, which determines the output's shape.
    pub fn primary(&self) -> &ArrayInfo {
        &self.input_infos[0]
    }
}

/// Resolve a transform for `output` against the catalog and registry.
///
/// Every referenced variable and function is checked here, so a bad
/// transform fails before any work is dispatched.
pub fn resolve(
    output: &str,
    transform: &Transform,
    catalog: &SourceCatalog,
    registry: &FunctionRegistry,
) -> Result<ResolvedTransform> {
    let names = transform.inputs();
    if names.is_empty() {
        return Err(RemapError::config(format!(
            "transform for '{output}' reads no source variables"
        )));
    }
    if let Some(missing) = names.iter().find(|n| !catalog.contains(n)) {
        return Err(RemapError::unknown_variable(output, *missing));
    }

    let op = match transform {
        Transform::Rename(_) => TransformOp::Identity,
        Transform::Linear { linear, offset } => TransformOp::Linear {
            scales: linear.iter().map(|t| t.scale).collect(),
            offset: *offset,
        },
        Transform::Function { function, .. } => {
            let func = registry
                .get(function)
                .ok_or_else(|| RemapError::UnknownFunction {
                    output: output.to_string(),
                    function: function.clone(),
                })?;
            TransformOp::Function {
                id: function.clone(),
                func,
            }
        }
    };

    let mut inputs = Vec::with_capacity(names.len());
    let mut input_infos = Vec::with_capacity(names.len());
    for name in &names {
        let array = catalog.array(name)?;
        input_infos.push(array_info(&array)?);
        inputs.push(array);
    }

    let primary = &input_infos[0];
    for (name, info) in names.iter().zip(&input_infos).skip(1) {
        if info.rank() != primary.rank() {
            return Err(RemapError::RankMismatch(format!(
                "'{output}': '{name}' has rank {} but '{}' has rank {}",
                info.rank(),
                names[0],
                primary.rank()
            )));
        }
        if info.shape != primary.shape {
            return Err(RemapError::config(format!(
                "'{output}': '{name}' has shape {:?} but '{}' has shape {:?}",
                info.shape, names[0], primary.shape
            )));
        }
    }

    Ok(ResolvedTransform {
        output: output.to_string(),
        input_names: names.iter().map(|n| n.to_string()).collect(),
        inputs,
        input_infos,
        op,
    })
}
