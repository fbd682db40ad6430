use std::collections::BTreeMap;

/// A dense `level -> URL` mapping for one tile's Gaussian pyramid. Level 0 is full
/// resolution; each subsequent level halves both dimensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImagePyramid {
	levels: BTreeMap<u32, String>,
}

impl ImagePyramid {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, level: u32, url: String) {
		self.levels.insert(level, url);
	}

	pub fn get(&self, level: u32) -> Option<&str> {
		self.levels.get(&level).map(String::as_str)
	}

	pub fn len(&self) -> usize {
		self.levels.len()
	}

	pub fn is_empty(&self) -> bool {
		self.levels.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
		self.levels.iter().map(|(level, url)| (*level, url.as_str()))
	}
}

impl FromIterator<(u32, String)> for ImagePyramid {
	fn from_iter<T: IntoIterator<Item = (u32, String)>>(iter: T) -> Self {
		ImagePyramid { levels: iter.into_iter().collect() }
	}
}
