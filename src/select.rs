use std::collections::BTreeSet;

/// Frame-budget and window parameters for both output formats.
#[derive(Clone, Debug)]
pub struct SelectConfig {
    /// Hard frame budget for the looping image format.
    pub loop_frame_cap: usize,
    /// Half-width of the must-include window around each estimated
    /// transition midpoint (loop image).
    pub loop_window_radius: usize,
    /// Hard frame budget for the video format.
    pub video_frame_cap: usize,
    /// Half-width of the transition window for video (wider: motion is
    /// cheaper there).
    pub video_window_radius: usize,
    /// Static regions sample roughly one frame per this many source frames
    /// for video.
    pub video_static_stride: usize,
    /// Floor on samples per static region for video.
    pub video_static_min: usize,
}

impl Default for SelectConfig {
    fn default() -> Self {
        Self {
            loop_frame_cap: 80,
            loop_window_radius: 6,
            video_frame_cap: 120,
            video_window_radius: 10,
            video_static_stride: 10,
            video_static_min: 3,
        }
    }
}

/// Estimated transition windows: the set length divided evenly by the card
/// count, a fixed-width band around each segment midpoint. Inclusive ranges,
/// clamped to the set.
pub(crate) fn transition_windows(
    frame_count: usize,
    card_count: usize,
    radius: usize,
) -> Vec<(usize, usize)> {
    if frame_count == 0 {
        return Vec::new();
    }
    let cards = card_count.max(1);
    let segment = (frame_count / cards).max(1);
    (0..cards)
        .map(|k| {
            let mid = k * segment + segment / 2;
            let lo = mid.saturating_sub(radius);
            let hi = (mid + radius).min(frame_count - 1);
            (lo.min(frame_count - 1), hi)
        })
        .collect()
}

/// Select frames for the looping image format.
///
/// Transition windows are kept in full; the remaining budget is spent on an
/// even sub-sample of the static frames. Index 0 is always included, and the
/// final index survives any decimation.
pub fn select_loop_frames(
    frame_count: usize,
    card_count: usize,
    cfg: &SelectConfig,
) -> Vec<usize> {
    let cap = cfg.loop_frame_cap.max(1);
    if frame_count <= cap {
        return (0..frame_count).collect();
    }

    let mut selected: BTreeSet<usize> = BTreeSet::new();
    selected.insert(0);
    selected.insert(frame_count - 1);
    for (lo, hi) in transition_windows(frame_count, card_count, cfg.loop_window_radius) {
        selected.extend(lo..=hi);
    }

    if selected.len() >= cap {
        return decimate(selected.into_iter().collect(), cap);
    }

    let residual = cap - selected.len();
    let static_frames: Vec<usize> = (0..frame_count)
        .filter(|i| !selected.contains(i))
        .collect();
    selected.extend(evenly_spaced(&static_frames, residual));

    selected.into_iter().collect()
}

/// Select frames for the video format.
///
/// Same window detection with a wider band; static regions are sampled
/// sparsely (about one frame per `video_static_stride`, never fewer than
/// `video_static_min` per region). Overflow is resolved by uniform
/// decimation that preserves the final frame.
pub fn select_video_frames(
    frame_count: usize,
    card_count: usize,
    cfg: &SelectConfig,
) -> Vec<usize> {
    let cap = cfg.video_frame_cap.max(1);
    if frame_count <= cap {
        return (0..frame_count).collect();
    }

    let windows = transition_windows(frame_count, card_count, cfg.video_window_radius);
    let mut selected: BTreeSet<usize> = BTreeSet::new();
    selected.insert(0);
    selected.insert(frame_count - 1);
    for &(lo, hi) in &windows {
        selected.extend(lo..=hi);
    }

    for region in static_regions(frame_count, &windows) {
        let want = (region.len() / cfg.video_static_stride)
            .max(cfg.video_static_min)
            .min(region.len());
        selected.extend(evenly_spaced(&region, want));
    }

    let selected: Vec<usize> = selected.into_iter().collect();
    if selected.len() > cap {
        decimate(selected, cap)
    } else {
        selected
    }
}

/// Maximal runs of indices not covered by any window.
fn static_regions(frame_count: usize, windows: &[(usize, usize)]) -> Vec<Vec<usize>> {
    let mut covered = vec![false; frame_count];
    for &(lo, hi) in windows {
        for flag in covered.iter_mut().take(hi + 1).skip(lo) {
            *flag = true;
        }
    }

    let mut regions = Vec::new();
    let mut run: Vec<usize> = Vec::new();
    for (i, &is_covered) in covered.iter().enumerate() {
        if is_covered {
            if !run.is_empty() {
                regions.push(std::mem::take(&mut run));
            }
        } else {
            run.push(i);
        }
    }
    if !run.is_empty() {
        regions.push(run);
    }
    regions
}

/// Pick `take` items spread evenly across `items` (all of them when the
/// budget covers the slice).
fn evenly_spaced(items: &[usize], take: usize) -> Vec<usize> {
    if take >= items.len() {
        return items.to_vec();
    }
    if take == 0 {
        return Vec::new();
    }
    (0..take).map(|i| items[i * items.len() / take]).collect()
}

/// Uniformly thin an already-sorted selection down to `cap`, keeping the
/// first and last entries.
fn decimate(sorted: Vec<usize>, cap: usize) -> Vec<usize> {
    if sorted.len() <= cap {
        return sorted;
    }
    if cap == 1 {
        return sorted.last().map(|&i| vec![i]).unwrap_or_default();
    }

    let last = sorted.len() - 1;
    let mut out: Vec<usize> = (0..cap - 1).map(|i| sorted[i * last / (cap - 1)]).collect();
    out.push(sorted[last]);
    out.dedup();
    out
}
