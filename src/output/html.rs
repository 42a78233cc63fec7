use super::report::DetailedReport;
use crate::exploits::Severity;

/// Render a detailed report as a self-contained HTML page.
pub fn render(report: &DetailedReport) -> String {
    let summary = &report.executive_summary;
    let counts = &summary.counts;

    let finding_rows: String = report
        .findings
        .iter()
        .map(|f| {
            let sev_class = severity_class(f.severity);
            let cwe = f
                .cwe
                .as_ref()
                .map(|c| {
                    format!(
                        "<a href=\"https://cwe.mitre.org/data/definitions/{}.html\">{}</a>",
                        c.trim_start_matches("CWE-"),
                        c
                    )
                })
                .unwrap_or_else(|| "-".into());
            let mut detail = String::new();
            if let Some(payload) = &f.payload {
                detail.push_str(&format!(
                    "<p><strong>Payload:</strong> <code>{}</code></p>",
                    html_escape(payload)
                ));
            }
            if let Some(evidence) = &f.evidence {
                detail.push_str(&format!(
                    "<pre><code>{}</code></pre>",
                    html_escape(evidence)
                ));
            }
            if let Some(rec) = &f.recommendation {
                detail.push_str(&format!("<p><strong>Fix:</strong> {}</p>", html_escape(rec)));
            }

            format!(
                r#"<tr class="{sev_class}">
  <td><span class="badge {sev_class}">{severity}</span></td>
  <td>{kind}</td>
  <td class="msg">{description}</td>
  <td><code>{location}</code></td>
  <td>{cwe}</td>
</tr>
<tr class="detail-row {sev_class}">
  <td colspan="5">
    <details>
      <summary>Evidence &amp; Remediation</summary>
      {detail}
    </details>
  </td>
</tr>"#,
                sev_class = sev_class,
                severity = f.severity.as_str().to_uppercase(),
                kind = html_escape(&f.kind),
                description = html_escape(&f.description),
                location = html_escape(&f.location),
                cwe = cwe,
                detail = detail,
            )
        })
        .collect();

    let key_findings: String = if summary.key_findings.is_empty() {
        "<li>No critical or high severity findings.</li>".into()
    } else {
        summary
            .key_findings
            .iter()
            .map(|k| format!("<li>{}</li>", html_escape(k)))
            .collect()
    };

    let recommendations: String = report
        .recommendations
        .iter()
        .map(|r| format!("<li>{}</li>", html_escape(r)))
        .collect();

    let failures: String = report
        .scans
        .iter()
        .filter(|s| !s.success)
        .map(|s| {
            format!(
                "<li><code>{}</code>: {}</li>",
                html_escape(&s.exploit_name),
                html_escape(s.error.as_deref().unwrap_or("failed"))
            )
        })
        .collect();

    let risk_class = severity_class(summary.risk_level);

    format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>scanforge Report: {target}</title>
<style>
  :root {{
    --bg: #0d1117; --fg: #c9d1d9; --border: #30363d;
    --card: #161b22; --badge-crit: #f85149; --badge-high: #f0883e;
    --badge-med: #d29922; --badge-low: #58a6ff; --badge-info: #8b949e;
  }}
  * {{ margin: 0; padding: 0; box-sizing: border-box; }}
  body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Helvetica, Arial, sans-serif;
    background: var(--bg); color: var(--fg); line-height: 1.5; padding: 2rem; }}
  .container {{ max-width: 1200px; margin: 0 auto; }}
  header {{ display: flex; align-items: center; justify-content: space-between;
    padding: 1.5rem; background: var(--card); border: 1px solid var(--border);
    border-radius: 8px; margin-bottom: 1.5rem; }}
  header h1 {{ font-size: 1.4rem; }}
  header h1 span {{ color: var(--badge-low); font-weight: 400; }}
  .risk {{ font-size: 1.1rem; font-weight: 700; padding: 0.4rem 1.2rem;
    border-radius: 6px; color: #fff; text-transform: uppercase; }}
  .risk.critical {{ background: var(--badge-crit); }}
  .risk.high {{ background: var(--badge-high); }}
  .risk.medium {{ background: var(--badge-med); color: #000; }}
  .risk.low {{ background: var(--badge-low); color: #000; }}
  .risk.info {{ background: var(--badge-info); color: #000; }}
  section {{ background: var(--card); border: 1px solid var(--border);
    border-radius: 8px; padding: 1rem 1.5rem; margin-bottom: 1.5rem; }}
  section h2 {{ font-size: 1.1rem; margin-bottom: 0.5rem; }}
  section ul {{ margin-left: 1.5rem; }}
  .summary {{ display: grid; grid-template-columns: repeat(auto-fit, minmax(140px, 1fr));
    gap: 1rem; margin-bottom: 1.5rem; }}
  .stat {{ background: var(--card); border: 1px solid var(--border);
    border-radius: 8px; padding: 1rem; text-align: center; }}
  .stat .count {{ font-size: 2rem; font-weight: 700; }}
  .stat .label {{ font-size: 0.85rem; color: var(--badge-info); }}
  .stat.critical .count {{ color: var(--badge-crit); }}
  .stat.high .count {{ color: var(--badge-high); }}
  .stat.medium .count {{ color: var(--badge-med); }}
  .stat.low .count {{ color: var(--badge-low); }}
  .stat.info .count {{ color: var(--badge-info); }}
  table {{ width: 100%; border-collapse: collapse; background: var(--card);
    border: 1px solid var(--border); border-radius: 8px; overflow: hidden;
    margin-bottom: 1.5rem; }}
  th {{ text-align: left; padding: 0.75rem 1rem; border-bottom: 2px solid var(--border);
    font-size: 0.8rem; text-transform: uppercase; color: var(--badge-info); }}
  td {{ padding: 0.6rem 1rem; border-bottom: 1px solid var(--border);
    font-size: 0.9rem; vertical-align: top; }}
  .msg {{ max-width: 400px; }}
  .badge {{ display: inline-block; padding: 0.15rem 0.5rem; border-radius: 4px;
    font-size: 0.75rem; font-weight: 700; color: #fff; }}
  .badge.critical {{ background: var(--badge-crit); }}
  .badge.high {{ background: var(--badge-high); }}
  .badge.medium {{ background: var(--badge-med); color: #000; }}
  .badge.low {{ background: var(--badge-low); color: #000; }}
  .badge.info {{ background: var(--badge-info); color: #000; }}
  .detail-row td {{ padding: 0.25rem 1rem 0.75rem; }}
  details {{ cursor: pointer; }}
  details summary {{ color: var(--badge-low); font-size: 0.85rem; }}
  details pre {{ background: var(--bg); padding: 0.5rem; border-radius: 4px;
    margin-top: 0.3rem; overflow-x: auto; font-size: 0.8rem; }}
  details p {{ font-size: 0.85rem; margin-top: 0.5rem; }}
  footer {{ margin-top: 1.5rem; text-align: center; font-size: 0.8rem;
    color: var(--badge-info); }}
  .empty {{ text-align: center; padding: 3rem; color: var(--badge-low); font-size: 1.2rem; }}
</style>
</head>
<body>
<div class="container">
  <header>
    <h1>scanforge <span>v{version}</span></h1>
    <div class="risk {risk_class}">{risk_level} risk ({risk_score})</div>
  </header>

  <section>
    <h2>Executive Summary</h2>
    <p>{overview}</p>
    <p>Report <code>{report_id}</code> covering {exploits}. Generated {generated}.</p>
  </section>

  <div class="summary">
    <div class="stat"><div class="count">{total}</div><div class="label">Total</div></div>
    <div class="stat critical"><div class="count">{critical}</div><div class="label">Critical</div></div>
    <div class="stat high"><div class="count">{high}</div><div class="label">High</div></div>
    <div class="stat medium"><div class="count">{medium}</div><div class="label">Medium</div></div>
    <div class="stat low"><div class="count">{low}</div><div class="label">Low</div></div>
    <div class="stat info"><div class="count">{info_count}</div><div class="label">Info</div></div>
  </div>

  <section>
    <h2>Key Findings</h2>
    <ul>{key_findings}</ul>
  </section>

  {content}

  {failures}

  <section>
    <h2>Recommendations</h2>
    <ul>{recommendations}</ul>
  </section>

  <footer>
    Generated by scanforge {version} for <strong>{target}</strong>
  </footer>
</div>
</body>
</html>"##,
        target = html_escape(&report.metadata.target),
        version = env!("CARGO_PKG_VERSION"),
        risk_class = risk_class,
        risk_level = summary.risk_level,
        risk_score = summary.risk_score,
        overview = html_escape(&summary.overview),
        report_id = html_escape(&report.metadata.report_id),
        exploits = html_escape(&report.metadata.exploits.join(", ")),
        generated = report.metadata.generated_at.to_rfc3339(),
        total = counts.total_vulnerabilities,
        critical = counts.critical,
        high = counts.high,
        medium = counts.medium,
        low = counts.low,
        info_count = counts.info,
        key_findings = key_findings,
        content = if report.findings.is_empty() {
            "<div class=\"empty\">No security findings detected.</div>".to_string()
        } else {
            format!(
                r#"<table>
  <thead>
    <tr>
      <th>Severity</th><th>Type</th><th>Finding</th><th>Location</th><th>CWE</th>
    </tr>
  </thead>
  <tbody>
    {rows}
  </tbody>
</table>"#,
                rows = finding_rows
            )
        },
        failures = if failures.is_empty() {
            String::new()
        } else {
            format!("<section>\n    <h2>Failed Scans</h2>\n    <ul>{failures}</ul>\n  </section>")
        },
        recommendations = recommendations,
    )
}

fn severity_class(s: Severity) -> &'static str {
    match s {
        Severity::Critical => "critical",
        Severity::High => "high",
        Severity::Medium => "medium",
        Severity::Low => "low",
        Severity::Info => "info",
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exploits::{ModuleOutput, ScanOptions, Vulnerability};
    use crate::store::{ScanMetadata, ScanType, SecurityScan};

    #[test]
    fn escapes_payloads_and_lists_sections() {
        let finding = Vulnerability::new(
            "Reflected XSS",
            Severity::High,
            "http://localhost/?q=",
            "payload echoed unescaped",
        )
        .with_payload("<script>alert(1)</script>");
        let scan = SecurityScan::begin(
            "xss",
            "http://localhost/",
            ScanType::Url,
            ScanOptions::default(),
            ScanMetadata::default(),
        )
        .succeed(ModuleOutput::new(vec![finding], 0));

        let html = render(&DetailedReport::from_scan(&scan));
        assert!(html.contains("Executive Summary"));
        assert!(html.contains("Key Findings"));
        assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
        assert!(!html.contains("<script>alert(1)"));
        assert!(!html.contains("Failed Scans"));
    }

    #[test]
    fn empty_report_shows_placeholder() {
        let scan = SecurityScan::begin(
            "cors",
            "http://localhost/",
            ScanType::Url,
            ScanOptions::default(),
            ScanMetadata::default(),
        )
        .fail("target unreachable", 0);
        let html = render(&DetailedReport::from_scan(&scan));
        assert!(html.contains("No security findings detected."));
        assert!(html.contains("Failed Scans"));
        assert!(html.contains("target unreachable"));
    }
}
