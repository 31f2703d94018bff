use crate::model::OccupancyMetric;

/// Column headers of the occupancy export, in order.
pub const EXPORT_COLUMNS: [&str; 8] = [
    "Reactor",
    "Plant",
    "Block",
    "Available Hours",
    "Proposed Hours",
    "Actual Hours",
    "Downtime Hours",
    "Actual %",
];

/// One formatted export line. Hours and the percentage carry one decimal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRow {
    pub reactor: String,
    pub plant: String,
    pub block: String,
    pub available_hours: String,
    pub proposed_hours: String,
    pub actual_hours: String,
    pub downtime_hours: String,
    pub actual_percent: String,
}

impl ExportRow {
    pub fn cells(&self) -> [&str; 8] {
        [
            &self.reactor,
            &self.plant,
            &self.block,
            &self.available_hours,
            &self.proposed_hours,
            &self.actual_hours,
            &self.downtime_hours,
            &self.actual_percent,
        ]
    }
}

impl From<&OccupancyMetric> for ExportRow {
    fn from(m: &OccupancyMetric) -> Self {
        Self {
            reactor: m.reactor_serial_no.clone(),
            plant: m.plant_name.clone(),
            block: m.block_name.clone(),
            available_hours: format!("{:.1}", m.available_hours),
            proposed_hours: format!("{:.1}", m.proposed_hours),
            actual_hours: format!("{:.1}", m.actual_hours),
            downtime_hours: format!("{:.1}", m.downtime_hours),
            actual_percent: format!("{:.1}", m.actual_percent),
        }
    }
}

pub fn export_rows(metrics: &[OccupancyMetric]) -> Vec<ExportRow> {
    metrics.iter().map(ExportRow::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(actual_percent: f64) -> OccupancyMetric {
        OccupancyMetric {
            reactor_serial_no: "R-101".into(),
            window_start: 0,
            window_end: 720 * crate::model::HOUR_MS,
            available_hours: 710.0,
            proposed_hours: 12.26,
            proposed_percent: 1.725,
            actual_hours: 4.0,
            actual_percent,
            downtime_hours: 10.0,
            plant_name: "Plant Alpha".into(),
            block_name: "Block A".into(),
        }
    }

    #[test]
    fn row_matches_column_order() {
        let row = ExportRow::from(&metric(0.5634));
        assert_eq!(
            row.cells(),
            ["R-101", "Plant Alpha", "Block A", "710.0", "12.3", "4.0", "10.0", "0.6"]
        );
    }

    #[test]
    fn percent_has_one_decimal() {
        assert_eq!(ExportRow::from(&metric(0.0)).actual_percent, "0.0");
        assert_eq!(ExportRow::from(&metric(100.0)).actual_percent, "100.0");
        assert_eq!(ExportRow::from(&metric(33.333)).actual_percent, "33.3");
    }

    #[test]
    fn export_keeps_metric_order() {
        let mut second = metric(1.0);
        second.reactor_serial_no = "R-099".into();
        let rows = export_rows(&[metric(1.0), second]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].reactor, "R-099");
    }
}
