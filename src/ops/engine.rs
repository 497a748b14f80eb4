// ============================================================================
// FILTER ENGINE — off-thread filter execution with an explicit lifecycle
// ============================================================================
//
// Jobs run on a private rayon pool. Each job clones nothing shared: the
// request owns its pixel buffer, the response owns the result. Completion
// is reported through an mpsc channel that the session polls.
// ============================================================================

use std::sync::mpsc;

use crate::canvas::{LayerId, PixelBuffer};
use crate::error::{CanvasError, CanvasResult};
use crate::ops::filters::{self, FilterKind, FilterParams};
use crate::{log_err, log_info};

/// Dispatch message: everything a worker needs, nothing borrowed.
#[derive(Clone, Debug)]
pub struct FilterRequest {
    pub layer_id: LayerId,
    pub buffer: PixelBuffer,
    pub kind: FilterKind,
    pub params: FilterParams,
}

/// Completion message. On failure `buffer` is the untouched input.
#[derive(Debug)]
pub struct FilterResponse {
    pub job_id: u64,
    pub layer_id: LayerId,
    pub kind: FilterKind,
    pub buffer: PixelBuffer,
    pub success: bool,
    pub error: Option<String>,
}

pub struct FilterEngine {
    pool: Option<rayon::ThreadPool>,
    threads: usize,
    sender: mpsc::Sender<FilterResponse>,
    receiver: mpsc::Receiver<FilterResponse>,
    pending: usize,
    next_job_id: u64,
}

impl FilterEngine {
    /// Create a stopped engine. `threads == 0` lets rayon pick.
    pub fn new(threads: usize) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            pool: None,
            threads,
            sender,
            receiver,
            pending: 0,
            next_job_id: 1,
        }
    }

    pub fn start(&mut self) -> CanvasResult<()> {
        if self.pool.is_some() {
            return Ok(());
        }
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("layerfe-filter-{}", i));
        if self.threads > 0 {
            builder = builder.num_threads(self.threads);
        }
        let pool = builder
            .build()
            .map_err(|e| CanvasError::InvalidParameter(format!("filter pool: {}", e)))?;
        log_info!("FilterEngine: started with {} threads", pool.current_num_threads());
        self.pool = Some(pool);
        Ok(())
    }

    /// Stop accepting work. Jobs already queued still finish and can be
    /// collected with `poll`/`wait_all`.
    pub fn stop(&mut self) {
        if self.pool.take().is_some() {
            log_info!("FilterEngine: stopped ({} jobs in flight)", self.pending);
        }
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_some()
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Queue a job. Fails only if the engine is stopped.
    pub fn submit(&mut self, request: FilterRequest) -> CanvasResult<u64> {
        let Some(pool) = &self.pool else {
            return Err(CanvasError::InvalidParameter("filter engine is not running".into()));
        };
        let job_id = self.next_job_id;
        self.next_job_id += 1;
        self.pending += 1;

        let sender = self.sender.clone();
        pool.spawn(move || {
            let FilterRequest { layer_id, buffer, kind, params } = request;
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                filters::apply(&buffer, kind, &params)
            }));
            let response = match outcome {
                Ok(Ok(out)) => FilterResponse {
                    job_id,
                    layer_id,
                    kind,
                    buffer: out,
                    success: true,
                    error: None,
                },
                Ok(Err(e)) => FilterResponse {
                    job_id,
                    layer_id,
                    kind,
                    buffer,
                    success: false,
                    error: Some(e.to_string()),
                },
                Err(panic_info) => {
                    let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic_info.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "unknown panic payload".to_string()
                    };
                    log_err!("Filter '{}' panicked: {}", kind, msg);
                    FilterResponse {
                        job_id,
                        layer_id,
                        kind,
                        buffer,
                        success: false,
                        error: Some(msg),
                    }
                }
            };
            let _ = sender.send(response);
        });
        Ok(job_id)
    }

    /// Drain completed jobs without blocking.
    pub fn poll(&mut self) -> Vec<FilterResponse> {
        let mut done = Vec::new();
        while let Ok(r) = self.receiver.try_recv() {
            done.push(r);
        }
        self.pending = self.pending.saturating_sub(done.len());
        done
    }

    /// Block until every submitted job has reported back.
    pub fn wait_all(&mut self) -> Vec<FilterResponse> {
        let mut done = Vec::new();
        while self.pending > 0 {
            match self.receiver.recv() {
                Ok(r) => {
                    self.pending -= 1;
                    done.push(r);
                }
                Err(_) => break,
            }
        }
        done
    }
}

impl Drop for FilterEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::filters::Kernel;

    fn request(layer_id: LayerId, kind: FilterKind, value: f32) -> FilterRequest {
        FilterRequest {
            layer_id,
            buffer: PixelBuffer::new_filled(8, 8, [100, 100, 100, 255]).unwrap(),
            kind,
            params: FilterParams::value(value),
        }
    }

    #[test]
    fn stopped_engine_rejects_work() {
        let mut engine = FilterEngine::new(1);
        assert!(engine.submit(request(LayerId::new(), FilterKind::Invert, 0.0)).is_err());
        assert_eq!(engine.pending(), 0);
    }

    #[test]
    fn results_are_keyed_by_layer() {
        let mut engine = FilterEngine::new(2);
        engine.start().unwrap();
        let a = LayerId::new();
        let b = LayerId::new();
        engine.submit(request(a, FilterKind::Brightness, 10.0)).unwrap();
        engine.submit(request(b, FilterKind::Invert, 0.0)).unwrap();
        let mut done = engine.wait_all();
        done.sort_by_key(|r| r.job_id);
        assert_eq!(done.len(), 2);
        assert_eq!(done[0].layer_id, a);
        assert_eq!(done[0].buffer.get_pixel(0, 0), Some([110, 110, 110, 255]));
        assert_eq!(done[1].layer_id, b);
        assert_eq!(done[1].buffer.get_pixel(0, 0), Some([155, 155, 155, 255]));
        assert!(done.iter().all(|r| r.success));
        assert_eq!(engine.pending(), 0);
    }

    #[test]
    fn failed_job_returns_input_unchanged() {
        let mut engine = FilterEngine::new(1);
        engine.start().unwrap();
        let id = LayerId::new();
        engine.submit(request(id, FilterKind::Gamma, -1.0)).unwrap();
        let done = engine.wait_all();
        assert_eq!(done.len(), 1);
        assert!(!done[0].success);
        assert!(done[0].error.is_some());
        assert_eq!(done[0].buffer.get_pixel(3, 3), Some([100, 100, 100, 255]));
    }

    #[test]
    fn queued_jobs_finish_after_stop() {
        let mut engine = FilterEngine::new(1);
        engine.start().unwrap();
        let mut req = request(LayerId::new(), FilterKind::Convolution, 0.0);
        req.params = req.params.with_kernel(Kernel::sharpen());
        engine.submit(req).unwrap();
        engine.stop();
        assert!(!engine.is_running());
        assert_eq!(engine.wait_all().len(), 1);
    }
}
