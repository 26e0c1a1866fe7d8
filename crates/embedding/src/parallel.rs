//! Data-parallel replication of a language model across devices.

use candle_core::{Device, Tensor};

use crate::error::EmbeddingError;
use crate::features::FeatureBatch;
use crate::language_model::{ExpectedInputs, LanguageModel};

/// One replica per device; a batch is split into contiguous row chunks.
///
/// Replicas run one after another and their outputs are gathered on the
/// first replica's device in chunk order.
pub struct DataParallel {
    replicas: Vec<Box<dyn LanguageModel>>,
}

impl DataParallel {
    pub fn new(replicas: Vec<Box<dyn LanguageModel>>) -> Result<Self, EmbeddingError> {
        let first = replicas
            .first()
            .ok_or_else(|| {
                EmbeddingError::InvalidInput("data parallel needs at least one replica".into())
            })?;
        if let Some(odd) = replicas
            .iter()
            .find(|r| {
                r.output_dims() != first.output_dims() || r.model_type() != first.model_type()
            })
        {
            return Err(EmbeddingError::ModelLoad(format!(
                "replicas disagree: {} with {} dims vs {} with {} dims",
                first.model_type(),
                first.output_dims(),
                odd.model_type(),
                odd.output_dims()
            )));
        }
        Ok(Self { replicas })
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    fn primary(&self) -> &dyn LanguageModel {
        // `new` guarantees at least one replica.
        self.replicas[0].as_ref()
    }
}

impl LanguageModel for DataParallel {
    fn model_type(&self) -> &str {
        self.primary().model_type()
    }

    fn expected_inputs(&self) -> ExpectedInputs {
        self.primary().expected_inputs()
    }

    fn output_dims(&self) -> usize {
        self.primary().output_dims()
    }

    fn device(&self) -> &Device {
        self.primary().device()
    }

    fn forward_validated(&self, features: &FeatureBatch) -> Result<Tensor, EmbeddingError> {
        let rows = features.batch_size()?;
        let chunk = rows.div_ceil(self.replicas.len()).max(1);

        let mut outputs = Vec::with_capacity(self.replicas.len());
        for (index, replica) in self.replicas.iter().enumerate() {
            let start = index * chunk;
            if start >= rows {
                break;
            }
            let len = chunk.min(rows - start);
            let part = features.narrow(start, len)?.to_device(replica.device())?;
            let output = replica.forward_validated(&part)?;
            outputs.push(
                output
                    .to_device(self.device())
                    .map_err(|e| {
                        EmbeddingError::Device(format!("gathering replica {index} output: {e}"))
                    })?,
            );
        }
        tracing::trace!(rows, chunks = outputs.len(), "data parallel forward");

        Tensor::cat(&outputs, 0).map_err(|e| {
            EmbeddingError::Inference(format!("gathering replica outputs: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language_model::TEXT_INPUTS;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns one row per input, filled with `marker`, and counts calls.
    struct Marker {
        marker: f32,
        dims: usize,
        calls: Arc<AtomicUsize>,
    }

    impl LanguageModel for Marker {
        fn model_type(&self) -> &str {
            "BertModel"
        }

        fn expected_inputs(&self) -> ExpectedInputs {
            TEXT_INPUTS
        }

        fn output_dims(&self) -> usize {
            self.dims
        }

        fn device(&self) -> &Device {
            &Device::Cpu
        }

        fn forward_validated(&self, features: &FeatureBatch) -> Result<Tensor, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let rows = features.batch_size()?;
            Tensor::full(self.marker, (rows, self.dims), &Device::Cpu)
                .map_err(|e| EmbeddingError::Inference(e.to_string()))
        }
    }

    fn replicas(count: usize, calls: &Arc<AtomicUsize>) -> Vec<Box<dyn LanguageModel>> {
        (0..count)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let marker = i as f32;
                Box::new(Marker {
                    marker,
                    dims: 2,
                    calls: Arc::clone(calls),
                }) as Box<dyn LanguageModel>
            })
            .collect()
    }

    fn text_batch(rows: usize) -> FeatureBatch {
        let ids = Tensor::zeros((rows, 3), candle_core::DType::U32, &Device::Cpu).unwrap();
        FeatureBatch::new()
            .with("input_ids", ids.clone())
            .with("token_type_ids", ids.clone())
            .with("attention_mask", ids)
    }

    fn first_column(t: &Tensor) -> Vec<f32> {
        t.to_vec2::<f32>().unwrap().into_iter().map(|row| row[0]).collect()
    }

    #[test]
    fn splits_rows_into_contiguous_chunks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = DataParallel::new(replicas(2, &calls)).unwrap();
        let output = model.forward(&text_batch(5)).unwrap();
        assert_eq!(output.dims(), &[5, 2]);
        assert_eq!(first_column(&output), vec![0.0, 0.0, 0.0, 1.0, 1.0]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn idle_replicas_are_skipped_for_small_batches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = DataParallel::new(replicas(4, &calls)).unwrap();
        let output = model.forward(&text_batch(2)).unwrap();
        assert_eq!(first_column(&output), vec![0.0, 1.0]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn validates_inputs_before_splitting() {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = DataParallel::new(replicas(2, &calls)).unwrap();
        let features = FeatureBatch::new().with(
            "pixel_values",
            Tensor::zeros((2, 3), candle_core::DType::F32, &Device::Cpu).unwrap(),
        );
        assert!(matches!(
            model.forward(&features),
            Err(EmbeddingError::InputMismatch { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rejects_empty_and_disagreeing_replicas() {
        assert!(DataParallel::new(Vec::new()).is_err());

        let calls = Arc::new(AtomicUsize::new(0));
        let mut mixed = replicas(1, &calls);
        mixed.push(Box::new(Marker {
            marker: 0.0,
            dims: 3,
            calls: Arc::clone(&calls),
        }));
        assert!(DataParallel::new(mixed).is_err());
    }
}
