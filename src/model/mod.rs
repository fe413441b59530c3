//! UNet architecture configuration.
//!
//! The network itself is built and trained in the ML framework; this module
//! holds the serializable architecture description (conv-block parameters,
//! skip-connection variant, per-level filter counts) and, behind the
//! `tensorflow-model` feature, an inference wrapper around an exported
//! SavedModel.
//!
//! The configured UNet pads every convolution so outputs keep their input
//! size, and the final output block has a linear activation.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, ensure, Error, Result};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tensorflow-model")]
mod saved_model;

#[cfg(feature = "tensorflow-model")]
pub use saved_model::SegmentationModel;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    Same,
    Valid,
}

/// Configuration of one convolution + batch-norm + activation block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConvBlockConfig {
    pub filters: usize,
    pub kernel_size: usize,
    pub padding: Padding,
    pub strides: usize,
    pub activation: String,
}

impl Default for ConvBlockConfig {
    fn default() -> Self {
        Self {
            filters: 32,
            kernel_size: 3,
            padding: Padding::Same,
            strides: 1,
            activation: "swish".to_string(),
        }
    }
}

/// How encoder features are bridged into the decoder arm.
///
/// `None` passes no bridge information at all, which makes the network an
/// autoencoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipConnection {
    ElementwiseAdd,
    ElementwiseMultiply,
    Concatenate,
    None,
}

impl FromStr for SkipConnection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "elementwise_add" => Ok(Self::ElementwiseAdd),
            "elementwise_multiply" => Ok(Self::ElementwiseMultiply),
            "concatenate" => Ok(Self::Concatenate),
            "none" => Ok(Self::None),
            _ => bail!("skip connection '{s}' not recognized"),
        }
    }
}

impl fmt::Display for SkipConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ElementwiseAdd => "elementwise_add",
            Self::ElementwiseMultiply => "elementwise_multiply",
            Self::Concatenate => "concatenate",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

/// Architecture description of a UNet variant.
///
/// `layers` holds the filter count per resolution level; the encoder has one
/// block per level, the decoder mirrors all but the deepest level, so the
/// encoder is always one block longer than the decoder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UNetConfig {
    pub layers: Vec<usize>,
    pub output_filters: usize,
    pub skip: SkipConnection,
    pub name: String,
}

impl Default for UNetConfig {
    fn default() -> Self {
        Self {
            layers: vec![8, 16, 32],
            output_filters: 1,
            skip: SkipConnection::Concatenate,
            name: "unet".to_string(),
        }
    }
}

impl UNetConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.layers.len() >= 2,
            "a UNet needs at least two resolution levels, got {}",
            self.layers.len()
        );
        ensure!(self.layers.iter().all(|&f| f > 0), "filter counts must be non-zero");
        ensure!(self.output_filters > 0, "output_filters must be non-zero");
        Ok(())
    }

    pub fn levels(&self) -> usize {
        self.layers.len()
    }

    pub fn encoder_blocks(&self) -> Vec<ConvBlockConfig> {
        self.layers
            .iter()
            .map(|&filters| ConvBlockConfig {
                filters,
                ..ConvBlockConfig::default()
            })
            .collect()
    }

    pub fn decoder_blocks(&self) -> Vec<ConvBlockConfig> {
        self.layers[..self.layers.len() - 1]
            .iter()
            .map(|&filters| ConvBlockConfig {
                filters,
                ..ConvBlockConfig::default()
            })
            .collect()
    }

    /// Final 1x1 convolution producing the segmentation output. No
    /// activation, so callers can attach their own loss/thresholding.
    pub fn output_block(&self) -> ConvBlockConfig {
        ConvBlockConfig {
            filters: self.output_filters,
            kernel_size: 1,
            activation: "linear".to_string(),
            ..ConvBlockConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("concatenate", SkipConnection::Concatenate)]
    #[case("CONCATENATE", SkipConnection::Concatenate)]
    #[case("elementwise_add", SkipConnection::ElementwiseAdd)]
    #[case("Elementwise_Multiply", SkipConnection::ElementwiseMultiply)]
    #[case("none", SkipConnection::None)]
    fn test_skip_connection_from_str(#[case] input: &str, #[case] expected: SkipConnection) {
        assert_eq!(input.parse::<SkipConnection>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_skip_connection_rejected() {
        assert!("residual".parse::<SkipConnection>().is_err());
    }

    #[test]
    fn test_encoder_is_one_block_longer_than_decoder() {
        let config = UNetConfig::default();
        config.validate().unwrap();
        assert_eq!(config.encoder_blocks().len(), config.decoder_blocks().len() + 1);
        assert_eq!(
            config.encoder_blocks().iter().map(|b| b.filters).collect::<Vec<_>>(),
            vec![8, 16, 32]
        );
        assert_eq!(
            config.decoder_blocks().iter().map(|b| b.filters).collect::<Vec<_>>(),
            vec![8, 16]
        );
    }

    #[test]
    fn test_output_block_is_linear_1x1() {
        let config = UNetConfig {
            output_filters: 3,
            ..UNetConfig::default()
        };
        let block = config.output_block();
        assert_eq!(block.filters, 3);
        assert_eq!(block.kernel_size, 1);
        assert_eq!(block.activation, "linear");
    }

    #[test]
    fn test_single_level_config_rejected() {
        let config = UNetConfig {
            layers: vec![8],
            ..UNetConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = UNetConfig {
            layers: vec![16, 32, 64, 128],
            output_filters: 2,
            skip: SkipConnection::ElementwiseAdd,
            name: "unet_residual".to_string(),
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"elementwise_add\""));
        let back: UNetConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
