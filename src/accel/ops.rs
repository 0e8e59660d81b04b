use crate::accel::gpu::GpuBackend;
use crate::accel::manager::AcceleratedOp;
use crate::accel::{cpu, AccelError};
use crate::model::Record;

/// Column-major kernel input built from the filtered batch.
#[derive(Debug, Clone)]
pub struct ScoreInput {
    pub games: Vec<i32>,
    pub winning: Vec<f32>,
    pub rounds: u32,
    /// Number of leading records to compute (0 = all).
    pub max_items: usize,
}

impl ScoreInput {
    pub fn from_records(records: &[Record], rounds: u32, max_items: usize) -> Self {
        Self {
            games: records.iter().map(|r| r.games).collect(),
            winning: records.iter().map(|r| r.winning as f32).collect(),
            rounds,
            max_items,
        }
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    /// Records that actually get computed, clamped to `1..=len`.
    pub fn items(&self) -> usize {
        let n = self.len();
        if self.max_items == 0 || n == 0 {
            n
        } else {
            self.max_items.clamp(1, n)
        }
    }
}

/// The per-record mixing transform.
pub struct ScoreOp;

impl AcceleratedOp<ScoreInput, Vec<u32>> for ScoreOp {
    fn run_gpu(&self, input: &ScoreInput, gpu: &GpuBackend) -> Result<Vec<u32>, AccelError> {
        gpu.score(input)
    }

    fn run_parallel(&self, input: &ScoreInput) -> Result<Vec<u32>, AccelError> {
        Ok(cpu::score_all_parallel(input, cpu::thread_count()))
    }

    fn run_scalar(&self, input: &ScoreInput) -> Result<Vec<u32>, AccelError> {
        Ok(cpu::score_all(input))
    }
}
