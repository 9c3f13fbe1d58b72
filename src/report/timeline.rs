//! Execution Timeline
//!
//! Tracks case start/end times per worker for run reports and an ASCII
//! Gantt chart of how cases were spread across workers.

use std::collections::HashMap;
use std::time::Instant;

/// Type of timeline event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventType {
    /// Case started executing
    Started,
    /// Case finished without failure
    Completed,
    /// Case finished with a failure
    Failed,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub case_name: String,
    pub worker: usize,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Records when each case starts and finishes.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Records an event for a case.
    pub fn add_event(&mut self, case_name: impl Into<String>, worker: usize, event_type: EventType) {
        self.events.push(TimelineEvent {
            case_name: case_name.into(),
            worker,
            event_type,
            timestamp: Instant::now(),
        });
    }

    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Generates an ASCII Gantt chart, one bar per case, labelled with the
    /// worker that ran it.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = Instant::now().duration_since(self.start_time).as_millis();

        if total_time == 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total_time as f64;

        let mut case_times: HashMap<String, (usize, u128, u128)> = HashMap::new();

        for event in &self.events {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();

            match event.event_type {
                EventType::Started => {
                    case_times.insert(event.case_name.clone(), (event.worker, elapsed, elapsed));
                }
                EventType::Completed | EventType::Failed => {
                    if let Some(times) = case_times.get_mut(&event.case_name) {
                        times.2 = elapsed;
                    }
                }
            }
        }

        let mut sorted: Vec<_> = case_times.into_iter().collect();
        sorted.sort_by_key(|(name, (worker, start, _))| (*start, *worker, name.clone()));

        for (case_name, (worker, start, end)) in sorted {
            let start_pos = (start as f64 * scale) as usize;
            let duration = ((end.saturating_sub(start)) as f64 * scale).max(1.0) as usize;

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&"#".repeat(duration));

            output.push_str(&format!(
                "w{:<2} {:20} |{}| ({} ms)\n",
                worker,
                truncate(&case_name, 20),
                bar,
                end.saturating_sub(start)
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    /// Returns case durations in milliseconds.
    pub fn get_durations(&self) -> HashMap<String, u128> {
        let mut starts: HashMap<String, u128> = HashMap::new();
        let mut durations: HashMap<String, u128> = HashMap::new();

        for event in &self.events {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();

            match event.event_type {
                EventType::Started => {
                    starts.insert(event.case_name.clone(), elapsed);
                }
                EventType::Completed | EventType::Failed => {
                    if let Some(start) = starts.get(&event.case_name) {
                        durations.insert(event.case_name.clone(), elapsed - start);
                    }
                }
            }
        }

        durations
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pads or truncates a name to a fixed width.
fn truncate(s: &str, max_len: usize) -> String {
    let count = s.chars().count();
    if count <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_durations_per_case() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("login", 0, EventType::Started);
        thread::sleep(Duration::from_millis(30));
        timeline.add_event("login", 0, EventType::Completed);

        let durations = timeline.get_durations();
        assert!(*durations.get("login").unwrap() >= 30);
    }

    #[test]
    fn test_unfinished_case_has_no_duration() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("login", 1, EventType::Started);
        assert!(timeline.get_durations().is_empty());
    }

    #[test]
    fn test_gantt_chart_labels_workers() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("login", 0, EventType::Started);
        timeline.add_event("search", 1, EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event("login", 0, EventType::Completed);
        timeline.add_event("search", 1, EventType::Failed);

        let chart = timeline.gantt_chart();
        assert!(chart.contains("w0"));
        assert!(chart.contains("w1"));
        assert!(chart.contains("login"));
        assert!(chart.contains("search"));
        assert!(chart.contains("Total:"));
    }

    #[test]
    fn test_truncate_long_names() {
        assert_eq!(truncate("abc", 5), "abc  ");
        assert_eq!(truncate("abcdefghij", 6), "abc...");
    }
}
