//! Pixel-level operations the rest of the pipeline needs: Gaussian mipmap pyramids, contrast
//! enhancement for low-SNR EM/CLEM tiles, and the feature-matching stack (SIFT-like keypoints,
//! descriptor matching, RANSAC) the stitcher uses to find pointmatches between tile pairs.

pub mod clahe;
pub mod features;
pub mod matching;
pub mod pyramid;
pub mod ransac;

pub use clahe::equalize_adapthist;
pub use features::{Descriptor, Keypoint, SiftParams, detect_and_extract};
pub use matching::{MatchParams, match_descriptors};
pub use pyramid::{PyramidLevel, build_gaussian_pyramid};
pub use ransac::{RansacParams, ransac_euclidean};
