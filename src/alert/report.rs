//! Report artifact rendering.
//!
//! Turns the report cycle's textual summary into files suitable for email
//! attachment: a plain-text report and an SVG bar chart of average latency
//! per site.

use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Renders report artifacts into a directory.
#[derive(Debug, Clone)]
pub struct ReportRenderer {
    dir: PathBuf,
}

impl ReportRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn ensure_dir(&self) -> Result<(), RenderError> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Write the textual summary to a timestamped report file and return
    /// its path.
    pub fn render_report(&self, body: &str) -> Result<PathBuf, RenderError> {
        self.ensure_dir()?;
        let path = self
            .dir
            .join(format!("report_{}.txt", Utc::now().timestamp_millis()));
        let mut file = std::fs::File::create(&path)?;
        writeln!(file, "SiteLens Performance Report")?;
        writeln!(file, "Generated: {}", Utc::now().to_rfc3339())?;
        writeln!(file)?;
        file.write_all(body.as_bytes())?;
        Ok(path)
    }

    /// Render a bar chart of average response time per site and return the
    /// artifact path.
    pub fn render_latency_chart(&self, data: &[(String, u64)]) -> Result<PathBuf, RenderError> {
        self.ensure_dir()?;
        let path = self.dir.join("latency_chart.svg");
        std::fs::write(&path, latency_chart_svg(data))?;
        Ok(path)
    }
}

const CHART_WIDTH: u64 = 800;
const CHART_HEIGHT: u64 = 400;
const MARGIN: u64 = 40;

fn latency_chart_svg(data: &[(String, u64)]) -> String {
    let max = data.iter().map(|(_, v)| *v).max().unwrap_or(0).max(1);
    let plot_height = CHART_HEIGHT - 2 * MARGIN;
    let plot_width = CHART_WIDTH - 2 * MARGIN;
    let slot = if data.is_empty() {
        plot_width
    } else {
        plot_width / data.len() as u64
    };

    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{CHART_WIDTH}" height="{CHART_HEIGHT}">"#
    );
    svg.push_str(&format!(
        r#"<text x="{}" y="20" text-anchor="middle" font-size="14">Avg Response Time (ms)</text>"#,
        CHART_WIDTH / 2
    ));

    for (i, (label, value)) in data.iter().enumerate() {
        let bar_height = value * plot_height / max;
        let bar_width = (slot * 3 / 4).max(1);
        let x = MARGIN + i as u64 * slot + (slot - bar_width) / 2;
        let y = MARGIN + plot_height - bar_height;
        let label = xml_escape(label);
        svg.push_str(&format!(
            r##"<rect x="{x}" y="{y}" width="{bar_width}" height="{bar_height}" fill="#3b82f6"/>"##
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="middle" font-size="10">{value}</text>"#,
            x + bar_width / 2,
            y.saturating_sub(4)
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="middle" font-size="9">{label}</text>"#,
            x + bar_width / 2,
            CHART_HEIGHT - MARGIN / 2
        ));
    }

    svg.push_str("</svg>");
    svg
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_report_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = ReportRenderer::new(dir.path());
        let path = renderer.render_report("example.com\n + Uptime: 99.5%\n").unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("SiteLens Performance Report"));
        assert!(contents.contains("Uptime: 99.5%"));
    }

    #[test]
    fn test_chart_contains_every_site() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = ReportRenderer::new(dir.path());
        let data = vec![
            ("example.com".to_string(), 120),
            ("other.com".to_string(), 480),
        ];
        let path = renderer.render_latency_chart(&data).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("example.com"));
        assert!(svg.contains("other.com"));
        assert_eq!(svg.matches("<rect").count(), 2);
    }

    #[test]
    fn test_chart_handles_empty_data() {
        let svg = latency_chart_svg(&[]);
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
    }
}
