//! Minimal self-contained SVG rendering of a [`PathDiagram`].

use crate::diagram::{Edge, Node, PathDiagram};
use mp_core::Result;
use std::fmt::Write as _;
use std::path::Path;

const NODE_W: f64 = 120.0;
const NODE_H: f64 = 36.0;
const FONT: &str = "Helvetica, Arial, sans-serif";

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn node_center(diagram: &PathDiagram, id: &str, width: f64, height: f64) -> (f64, f64) {
    diagram
        .nodes
        .iter()
        .find(|n| n.id == id)
        .map(|n| (n.x * width, n.y * height))
        .unwrap_or((width / 2.0, height / 2.0))
}

/// Clip the segment from `(x1,y1)` to `(x2,y2)` at the border of the
/// node box around each endpoint, so arrows start and end at box edges.
fn clip_to_box(x1: f64, y1: f64, x2: f64, y2: f64) -> (f64, f64, f64, f64) {
    let dx = x2 - x1;
    let dy = y2 - y1;
    let len = (dx * dx + dy * dy).sqrt();
    if len < 1e-9 {
        return (x1, y1, x2, y2);
    }
    let (ux, uy) = (dx / len, dy / len);
    let tx = if ux.abs() < 1e-9 { f64::INFINITY } else { (NODE_W / 2.0) / ux.abs() };
    let ty = if uy.abs() < 1e-9 { f64::INFINITY } else { (NODE_H / 2.0) / uy.abs() };
    let t = tx.min(ty).min(len / 2.0);
    (x1 + ux * t, y1 + uy * t, x2 - ux * t, y2 - uy * t)
}

fn render_edge(svg: &mut String, diagram: &PathDiagram, e: &Edge, width: f64, height: f64) {
    let (x1, y1) = node_center(diagram, &e.from, width, height);
    let (x2, y2) = node_center(diagram, &e.to, width, height);
    let (ax1, ay1, ax2, ay2) = clip_to_box(x1, y1, x2, y2);
    let dash = if e.dashed { " stroke-dasharray=\"6 3\"" } else { "" };
    let _ = writeln!(
        svg,
        "  <line x1=\"{ax1:.1}\" y1=\"{ay1:.1}\" x2=\"{ax2:.1}\" y2=\"{ay2:.1}\" \
         stroke=\"#333\" stroke-width=\"1.5\"{dash} marker-end=\"url(#arrow)\"/>"
    );
    let (mx, my) = ((ax1 + ax2) / 2.0, (ay1 + ay2) / 2.0 - 6.0);
    let _ = writeln!(
        svg,
        "  <text x=\"{mx:.1}\" y=\"{my:.1}\" font-family=\"{FONT}\" font-size=\"11\" \
         text-anchor=\"middle\">{}</text>",
        escape(&e.label)
    );
}

fn render_node(svg: &mut String, n: &Node, width: f64, height: f64) {
    let cx = n.x * width;
    let cy = n.y * height;
    let _ = writeln!(
        svg,
        "  <rect x=\"{:.1}\" y=\"{:.1}\" width=\"{NODE_W}\" height=\"{NODE_H}\" rx=\"4\" \
         fill=\"#fff\" stroke=\"#333\" stroke-width=\"1.5\"/>",
        cx - NODE_W / 2.0,
        cy - NODE_H / 2.0
    );
    let _ = writeln!(
        svg,
        "  <text x=\"{cx:.1}\" y=\"{:.1}\" font-family=\"{FONT}\" font-size=\"13\" \
         text-anchor=\"middle\">{}</text>",
        cy + 4.5,
        escape(&n.label)
    );
}

/// Render the diagram to a self-contained SVG string.
pub fn to_svg(diagram: &PathDiagram, width: u32, height: u32) -> String {
    let (w, h) = (width as f64, height as f64);
    let mut svg = String::new();
    let _ = writeln!(
        svg,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\" \
         viewBox=\"0 0 {width} {height}\">"
    );
    let _ = writeln!(
        svg,
        "  <defs><marker id=\"arrow\" markerWidth=\"10\" markerHeight=\"8\" refX=\"9\" \
         refY=\"4\" orient=\"auto\"><path d=\"M0,0 L10,4 L0,8 z\" fill=\"#333\"/>\
         </marker></defs>"
    );
    let _ = writeln!(
        svg,
        "  <text x=\"{:.1}\" y=\"20\" font-family=\"{FONT}\" font-size=\"14\" \
         font-weight=\"bold\" text-anchor=\"middle\">{}</text>",
        w / 2.0,
        escape(&diagram.title)
    );
    // Edges first so node boxes sit on top.
    for e in &diagram.edges {
        render_edge(&mut svg, diagram, e, w, h);
    }
    for n in &diagram.nodes {
        render_node(&mut svg, n, w, h);
    }
    svg.push_str("</svg>\n");
    svg
}

/// Render and write the diagram to `path`.
pub fn save_svg(diagram: &PathDiagram, path: impl AsRef<Path>, width: u32, height: u32) -> Result<()> {
    std::fs::write(path, to_svg(diagram, width, height))?;
    Ok(())
}
