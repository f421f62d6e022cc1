//! CPU-side pass timings.
//!
//! Passes are bracketed with [`Profiler::begin`] / [`Profiler::end`];
//! [`Profiler::end_frame`] publishes the frame's timings for the UI.

use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq)]
pub struct PassTiming {
    pub name: &'static str,
    pub duration: Duration,
}

#[derive(Default)]
pub struct Profiler {
    open: Vec<(&'static str, Instant)>,
    current: Vec<PassTiming>,
    last: Vec<PassTiming>,
    frame_start: Option<Instant>,
    last_frame: Duration,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_frame(&mut self) {
        self.open.clear();
        self.current.clear();
        self.frame_start = Some(Instant::now());
    }

    pub fn begin(&mut self, name: &'static str) {
        self.open.push((name, Instant::now()));
    }

    /// Close the innermost open pass.
    pub fn end(&mut self) {
        if let Some((name, start)) = self.open.pop() {
            self.current.push(PassTiming {
                name,
                duration: start.elapsed(),
            });
        }
    }

    /// Time `f` as pass `name`.
    pub fn scope<T>(&mut self, name: &'static str, f: impl FnOnce() -> T) -> T {
        self.begin(name);
        let value = f();
        self.end();
        value
    }

    pub fn end_frame(&mut self) {
        while !self.open.is_empty() {
            self.end();
        }
        self.last = std::mem::take(&mut self.current);
        if let Some(start) = self.frame_start.take() {
            self.last_frame = start.elapsed();
        }
    }

    /// Timings of the last completed frame, in completion order.
    pub fn last_frame_timings(&self) -> &[PassTiming] {
        &self.last
    }

    /// Time of `name` in the last frame (summed if it ran more than once).
    pub fn pass_time(&self, name: &str) -> Option<Duration> {
        let mut found = None;
        for timing in self.last.iter().filter(|t| t.name == name) {
            *found.get_or_insert(Duration::ZERO) += timing.duration;
        }
        found
    }

    pub fn last_frame_time(&self) -> Duration {
        self.last_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_passes() {
        let mut profiler = Profiler::new();
        profiler.begin_frame();
        profiler.begin("frame");
        profiler.scope("trace", || std::thread::sleep(Duration::from_millis(2)));
        profiler.begin("tonemap");
        profiler.end();
        profiler.end();
        profiler.end_frame();

        let names: Vec<_> = profiler.last_frame_timings().iter().map(|t| t.name).collect();
        assert_eq!(names, ["trace", "tonemap", "frame"]);
        assert!(profiler.pass_time("trace").unwrap() >= Duration::from_millis(2));
        assert!(profiler.pass_time("frame").unwrap() >= profiler.pass_time("trace").unwrap());
        assert!(profiler.pass_time("denoise").is_none());
    }

    #[test]
    fn test_unclosed_pass_closed_at_frame_end() {
        let mut profiler = Profiler::new();
        profiler.begin_frame();
        profiler.begin("raster");
        profiler.end_frame();
        assert!(profiler.pass_time("raster").is_some());

        profiler.begin_frame();
        profiler.end_frame();
        assert!(profiler.last_frame_timings().is_empty());
    }
}
