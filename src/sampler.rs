//! Per-frame detection metadata sampling.
//!
//! The sampler sits at an instrumentation point between inference and
//! render. It is purely observational: it never mutates or drops a buffer,
//! and it must return immediately whether or not metadata is present. To
//! bound reporting overhead on high-rate streams it only emits a summary
//! when a frame's sequence number lands on the sampling cadence.

use serde::{Deserialize, Serialize};

/// One detected object in one frame. Coordinates are pixel units.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// 0..=1
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Detection results for one logical frame of a batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameDetections {
    pub sequence: u64,
    pub detections: Vec<Detection>,
}

#[derive(Debug)]
pub struct MetadataSampler {
    cadence: u64,
    frames_observed: u64,
    frames_sampled: u64,
}

impl MetadataSampler {
    pub fn new(cadence: u64) -> Self {
        Self {
            cadence: cadence.max(1),
            frames_observed: 0,
            frames_sampled: 0,
        }
    }

    /// Observe one batch of frame records and return the report lines for
    /// the sampled frames (empty when nothing lands on the cadence).
    ///
    /// Records are borrowed from the passing buffer and not retained.
    pub fn observe(&mut self, batch: &[FrameDetections]) -> Vec<String> {
        let mut lines = Vec::new();
        for frame in batch {
            self.frames_observed += 1;
            if !frame.sequence.is_multiple_of(self.cadence) {
                continue;
            }
            self.frames_sampled += 1;
            lines.push(format!(
                "Frame Number={} Number of Objects={}",
                frame.sequence,
                frame.detections.len()
            ));
            for det in &frame.detections {
                lines.push(format!(
                    "  {} conf={:.2} bbox={:.0},{:.0} {:.0}x{:.0}",
                    det.label, det.confidence, det.x, det.y, det.width, det.height
                ));
            }
        }
        lines
    }

    pub fn frames_observed(&self) -> u64 {
        self.frames_observed
    }

    pub fn frames_sampled(&self) -> u64 {
        self.frames_sampled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sequence: u64, detections: usize) -> FrameDetections {
        FrameDetections {
            sequence,
            detections: (0..detections)
                .map(|i| Detection {
                    label: "person".to_string(),
                    confidence: 0.87,
                    x: 100.0 + i as f32,
                    y: 50.0,
                    width: 40.0,
                    height: 120.0,
                })
                .collect(),
        }
    }

    #[test]
    fn summary_emitted_iff_sequence_on_cadence() {
        let mut sampler = MetadataSampler::new(30);
        for seq in 0..=90 {
            let lines = sampler.observe(&[frame(seq, 0)]);
            if seq % 30 == 0 {
                assert_eq!(
                    lines,
                    vec![format!("Frame Number={} Number of Objects=0", seq)]
                );
            } else {
                assert!(lines.is_empty(), "seq {} should not sample", seq);
            }
        }
        assert_eq!(sampler.frames_observed(), 91);
        assert_eq!(sampler.frames_sampled(), 4);
    }

    #[test]
    fn sampled_frame_reports_one_line_per_object() {
        let mut sampler = MetadataSampler::new(30);
        let lines = sampler.observe(&[frame(60, 3)]);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "Frame Number=60 Number of Objects=3");
        assert_eq!(lines[1], "  person conf=0.87 bbox=100,50 40x120");
    }

    #[test]
    fn empty_batch_is_a_noop() {
        let mut sampler = MetadataSampler::new(30);
        assert!(sampler.observe(&[]).is_empty());
        assert_eq!(sampler.frames_observed(), 0);
    }

    #[test]
    fn cadence_zero_clamps_to_every_frame() {
        let mut sampler = MetadataSampler::new(0);
        assert!(!sampler.observe(&[frame(7, 0)]).is_empty());
    }

    #[test]
    fn batch_with_multiple_frames_samples_each_independently() {
        let mut sampler = MetadataSampler::new(30);
        let lines = sampler.observe(&[frame(29, 1), frame(30, 2), frame(31, 1)]);
        assert_eq!(lines[0], "Frame Number=30 Number of Objects=2");
        assert_eq!(lines.len(), 3);
    }
}
