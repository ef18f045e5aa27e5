//! Layer classification
//!
//! Assigns each source file an architectural [`Layer`] from its path. The
//! classifier is injected into the model builder so rule packs with other
//! layering conventions can supply their own.

use crate::config::LayersConfig;
use crate::models::Layer;
use std::path::{Component, Path};
use tracing::warn;

/// Maps a repository-relative path to a layer
pub trait LayerClassifier: Send + Sync {
    fn classify(&self, path: &Path) -> Layer;
}

impl<F> LayerClassifier for F
where
    F: Fn(&Path) -> Layer + Send + Sync,
{
    fn classify(&self, path: &Path) -> Layer {
        self(path)
    }
}

/// Path-segment and file-name-suffix heuristics
///
/// Suffix rules on the file stem win (`order_repository.py` is
/// infrastructure wherever it lives). Otherwise the outermost path segment
/// naming a layer decides, so `domain/ui_state/x.py` is core.
#[derive(Debug, Clone)]
pub struct PathLayerClassifier {
    segments: Vec<(String, Layer)>,
    suffixes: Vec<(String, Layer)>,
}

impl PathLayerClassifier {
    pub fn new(segments: Vec<(String, Layer)>, mut suffixes: Vec<(String, Layer)>) -> Self {
        // Longest suffix first so `_repository_view` beats `_view`
        suffixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self {
            segments: segments
                .into_iter()
                .map(|(s, l)| (s.to_lowercase(), l))
                .collect(),
            suffixes: suffixes
                .into_iter()
                .map(|(s, l)| (s.to_lowercase(), l))
                .collect(),
        }
    }

    pub fn from_config(config: &LayersConfig) -> Self {
        let mut segments = Vec::new();
        for (names, layer) in [
            (&config.core, Layer::Core),
            (&config.infrastructure, Layer::Infrastructure),
            (&config.presentation, Layer::Presentation),
        ] {
            segments.extend(names.iter().map(|n| (n.clone(), layer)));
        }

        let mut suffixes = Vec::new();
        for (suffix, layer_name) in &config.suffixes {
            match Layer::parse(layer_name) {
                Some(layer) => suffixes.push((suffix.clone(), layer)),
                None => warn!(
                    "Ignoring layer suffix '{}': unknown layer '{}'",
                    suffix, layer_name
                ),
            }
        }

        Self::new(segments, suffixes)
    }

    fn segment_layer(&self, segment: &str) -> Option<Layer> {
        let segment = segment.to_lowercase();
        self.segments
            .iter()
            .find(|(name, _)| *name == segment)
            .map(|(_, layer)| *layer)
    }
}

impl Default for PathLayerClassifier {
    fn default() -> Self {
        Self::from_config(&LayersConfig::default())
    }
}

impl LayerClassifier for PathLayerClassifier {
    fn classify(&self, path: &Path) -> Layer {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if let Some((_, layer)) = self.suffixes.iter().find(|(sfx, _)| stem.ends_with(sfx.as_str())) {
            return *layer;
        }

        let dirs = path.parent().into_iter().flat_map(|p| p.components());
        for component in dirs {
            if let Component::Normal(segment) = component {
                if let Some(layer) = self.segment_layer(&segment.to_string_lossy()) {
                    return layer;
                }
            }
        }

        self.segment_layer(&stem).unwrap_or(Layer::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_classify() {
        let c = PathLayerClassifier::default();
        assert_eq!(c.classify(Path::new("app/domain/order.py")), Layer::Core);
        assert_eq!(c.classify(Path::new("src/Infra/db.ts")), Layer::Infrastructure);
        assert_eq!(c.classify(Path::new("web/views/home.tsx")), Layer::Presentation);
        assert_eq!(c.classify(Path::new("scripts/run.py")), Layer::Unknown);
    }

    #[test]
    fn test_outermost_segment_wins() {
        let c = PathLayerClassifier::default();
        assert_eq!(c.classify(Path::new("domain/ui/state.py")), Layer::Core);
    }

    #[test]
    fn test_suffix_beats_segment() {
        let c = PathLayerClassifier::default();
        assert_eq!(
            c.classify(Path::new("domain/order_repository.py")),
            Layer::Infrastructure
        );
    }

    #[test]
    fn test_file_stem_counts_as_segment() {
        let c = PathLayerClassifier::default();
        assert_eq!(c.classify(Path::new("src/models.py")), Layer::Core);
    }

    #[test]
    fn test_closure_classifier() {
        let c = |p: &Path| {
            if p.starts_with("k") {
                Layer::Core
            } else {
                Layer::Unknown
            }
        };
        assert_eq!(LayerClassifier::classify(&c, Path::new("k/a.rs")), Layer::Core);
    }

    #[test]
    fn test_unknown_suffix_layer_ignored() {
        let mut config = LayersConfig::default();
        config
            .suffixes
            .insert("_thing".to_string(), "nowhere".to_string());
        let c = PathLayerClassifier::from_config(&config);
        assert_eq!(c.classify(Path::new("x/a_thing.py")), Layer::Unknown);
    }
}
