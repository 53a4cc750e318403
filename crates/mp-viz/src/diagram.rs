//! Path-diagram artifact (numbers-first).
//!
//! The diagram is a serializable description of nodes and labeled edges;
//! rendering to SVG is a separate step (`crate::render`). Layout uses
//! unit coordinates (0..1 in both axes) that the renderer scales.

use mp_inference::{MediationResult, MediationSpec, ModerationResult, ModerationSpec};
use mp_inference::multilevel::{MultilevelMediationResult, MultilevelMediationSpec};
use mp_inference::OlsFit;
use serde::Serialize;

/// Artifact schema version.
pub const SCHEMA_VERSION: &str = "medpath-diagram/1";

/// A box in the diagram.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    /// Stable identifier referenced by edges.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Center x in unit coordinates.
    pub x: f64,
    /// Center y in unit coordinates.
    pub y: f64,
}

/// A labeled arrow between two nodes.
#[derive(Debug, Clone, Serialize)]
pub struct Edge {
    /// Source node id.
    pub from: String,
    /// Target node id.
    pub to: String,
    /// Display label, e.g. `a = 1.52 (p < .001)`.
    pub label: String,
    /// Coefficient carried by the edge.
    pub coefficient: f64,
    /// Standard error of the coefficient.
    pub se: f64,
    /// Two-sided p-value of the coefficient.
    pub p_value: f64,
    /// Render as a dashed line (used for the direct path).
    pub dashed: bool,
}

/// A serializable path diagram.
#[derive(Debug, Clone, Serialize)]
pub struct PathDiagram {
    /// Artifact schema version.
    pub schema_version: String,
    /// Diagram title.
    pub title: String,
    /// Boxes.
    pub nodes: Vec<Node>,
    /// Arrows.
    pub edges: Vec<Edge>,
}

/// Compact p-value label in the reporting convention.
pub fn format_p(p: f64) -> String {
    if !p.is_finite() {
        "p n/a".to_string()
    } else if p < 0.001 {
        "p < .001".to_string()
    } else {
        format!("p = {:.3}", p)
    }
}

fn path_label(name: &str, coefficient: f64, p: f64) -> String {
    if p.is_finite() {
        format!("{name} = {coefficient:.3} ({})", format_p(p))
    } else {
        format!("{name} = {coefficient:.3}")
    }
}

fn ols_edge(
    fit: &OlsFit,
    term: &str,
    from: &str,
    to: &str,
    path: &str,
    dashed: bool,
) -> Option<Edge> {
    let i = fit.index_of(term)?;
    Some(Edge {
        from: from.to_string(),
        to: to.to_string(),
        label: path_label(path, fit.coefficients[i], fit.p_values[i]),
        coefficient: fit.coefficients[i],
        se: fit.standard_errors[i],
        p_value: fit.p_values[i],
        dashed,
    })
}

/// Diagram for a simple mediation analysis.
///
/// One X node per predictor indicator, the mediator on top, the outcome
/// on the right; the direct path is drawn dashed.
pub fn mediation_diagram(spec: &MediationSpec, result: &MediationResult) -> PathDiagram {
    let n_x = result.effects.len();
    let mut nodes = Vec::new();
    let mut edges = Vec::new();

    nodes.push(Node {
        id: "m".to_string(),
        label: spec.mediator.clone(),
        x: 0.5,
        y: 0.15,
    });
    nodes.push(Node {
        id: "y".to_string(),
        label: spec.dependent.clone(),
        x: 0.85,
        y: 0.75,
    });

    for (k, effect) in result.effects.iter().enumerate() {
        let id = format!("x{k}");
        let y = if n_x == 1 {
            0.75
        } else {
            0.55 + 0.4 * k as f64 / (n_x - 1) as f64
        };
        nodes.push(Node { id: id.clone(), label: effect.term.clone(), x: 0.15, y });

        if let Some(e) = ols_edge(&result.mediator_model, &effect.term, &id, "m", "a", false) {
            edges.push(e);
        }
        if let Some(e) = ols_edge(&result.full_model, &effect.term, &id, "y", "c'", true) {
            edges.push(e);
        }
    }
    if let Some(e) = ols_edge(&result.full_model, &spec.mediator, "m", "y", "b", false) {
        edges.push(e);
    }

    PathDiagram {
        schema_version: SCHEMA_VERSION.to_string(),
        title: format!(
            "{} -> {} -> {} (indirect {:.3})",
            spec.predictor, spec.mediator, spec.dependent, result.effects[0].indirect
        ),
        nodes,
        edges,
    }
}

/// Diagram for a moderation analysis: X, W, and the product term each
/// point at the outcome.
pub fn moderation_diagram(spec: &ModerationSpec, result: &ModerationResult) -> PathDiagram {
    let mut nodes = vec![
        Node { id: "x".to_string(), label: spec.predictor.clone(), x: 0.15, y: 0.2 },
        Node { id: "w".to_string(), label: spec.moderator.clone(), x: 0.15, y: 0.5 },
        Node { id: "y".to_string(), label: spec.dependent.clone(), x: 0.85, y: 0.5 },
    ];
    let mut edges = Vec::new();

    let x_terms: Vec<&str> = result
        .interactions
        .iter()
        .map(|i| i.term.split(':').next().unwrap_or(i.term.as_str()))
        .collect();
    for term in &x_terms {
        if let Some(mut e) = ols_edge(&result.model, term, "x", "y", "b1", false) {
            // One predictor edge per indicator; tag them when X is categorical.
            if x_terms.len() > 1 {
                e.label = format!("[{term}] {}", e.label);
            }
            edges.push(e);
        }
    }
    if let Some(e) = ols_edge(&result.model, &spec.moderator, "w", "y", "b2", false) {
        edges.push(e);
    }
    for (k, inter) in result.interactions.iter().enumerate() {
        let id = format!("xw{k}");
        nodes.push(Node {
            id: id.clone(),
            label: inter.term.clone(),
            x: 0.15,
            y: 0.8 + 0.1 * k as f64,
        });
        edges.push(Edge {
            from: id,
            to: "y".to_string(),
            label: path_label("b3", inter.coefficient, inter.p_value),
            coefficient: inter.coefficient,
            se: inter.se,
            p_value: inter.p_value,
            dashed: false,
        });
    }

    PathDiagram {
        schema_version: SCHEMA_VERSION.to_string(),
        title: format!(
            "{} x {} -> {}",
            spec.predictor, spec.moderator, spec.dependent
        ),
        nodes,
        edges,
    }
}

/// Diagram for a multilevel mediation analysis.
pub fn multilevel_diagram(
    spec: &MultilevelMediationSpec,
    result: &MultilevelMediationResult,
) -> PathDiagram {
    let e = &result.effect;
    let nodes = vec![
        Node { id: "x".to_string(), label: spec.predictor.clone(), x: 0.15, y: 0.75 },
        Node { id: "m".to_string(), label: spec.mediator.clone(), x: 0.5, y: 0.15 },
        Node { id: "y".to_string(), label: spec.dependent.clone(), x: 0.85, y: 0.75 },
    ];
    let a_p = result
        .mediator_model
        .index_of(&e.term)
        .map(|i| result.mediator_model.p_values[i])
        .unwrap_or(f64::NAN);
    let b_p = result
        .full_model
        .index_of(&spec.mediator)
        .map(|i| result.full_model.p_values[i])
        .unwrap_or(f64::NAN);
    let c_p = result
        .full_model
        .index_of(&e.term)
        .map(|i| result.full_model.p_values[i])
        .unwrap_or(f64::NAN);

    let edges = vec![
        Edge {
            from: "x".to_string(),
            to: "m".to_string(),
            label: path_label("a", e.a, a_p),
            coefficient: e.a,
            se: e.se_a,
            p_value: a_p,
            dashed: false,
        },
        Edge {
            from: "m".to_string(),
            to: "y".to_string(),
            label: path_label("b", e.b, b_p),
            coefficient: e.b,
            se: e.se_b,
            p_value: b_p,
            dashed: false,
        },
        Edge {
            from: "x".to_string(),
            to: "y".to_string(),
            label: path_label("c'", e.direct, c_p),
            coefficient: e.direct,
            se: result
                .full_model
                .se(&e.term)
                .unwrap_or(f64::NAN),
            p_value: c_p,
            dashed: true,
        },
    ];

    PathDiagram {
        schema_version: SCHEMA_VERSION.to_string(),
        title: format!(
            "{} -> {} -> {} by {} ({} clusters)",
            spec.predictor, spec.mediator, spec.dependent, spec.group, result.n_groups
        ),
        nodes,
        edges,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p_formatting() {
        assert_eq!(format_p(0.0005), "p < .001");
        assert_eq!(format_p(0.0314), "p = 0.031");
        assert_eq!(format_p(0.5), "p = 0.500");
        assert_eq!(format_p(f64::NAN), "p n/a");
    }

    #[test]
    fn label_omits_p_when_unavailable() {
        assert_eq!(path_label("a", 1.5, 0.02), "a = 1.500 (p = 0.020)");
        assert_eq!(path_label("a", 1.5, f64::NAN), "a = 1.500");
    }
}
