use image::GrayImage;

use super::{FilterError, FilterParams, InputFilter};

/// Ordered composite of filters, itself usable as a filter.
///
/// Configuration of a composite lives in its spec form: `init` does nothing
/// and `params` is always empty.
#[derive(Debug, Default)]
pub struct InputFilterList {
    filters: Vec<Box<dyn InputFilter>>,
}

impl InputFilterList {
    pub const KEY: &'static str = "list";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, filter: Box<dyn InputFilter>) {
        self.filters.push(filter);
    }

    /// Remove and return the filter at `index`, if any.
    pub fn remove(&mut self, index: usize) -> Option<Box<dyn InputFilter>> {
        (index < self.filters.len()).then(|| self.filters.remove(index))
    }

    pub fn get(&self, index: usize) -> Option<&dyn InputFilter> {
        self.filters.get(index).map(|f| f.as_ref())
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Box<dyn InputFilter>> {
        self.filters.get_mut(index)
    }

    pub fn clear(&mut self) {
        self.filters.clear();
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn filters(&self) -> &[Box<dyn InputFilter>] {
        &self.filters
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn InputFilter> {
        self.filters.iter().map(|f| f.as_ref())
    }
}

impl FromIterator<Box<dyn InputFilter>> for InputFilterList {
    fn from_iter<I: IntoIterator<Item = Box<dyn InputFilter>>>(iter: I) -> Self {
        Self {
            filters: iter.into_iter().collect(),
        }
    }
}

impl InputFilter for InputFilterList {
    fn implementation_key(&self) -> &str {
        Self::KEY
    }

    fn process(&self, image: GrayImage, scale: f64) -> Result<GrayImage, FilterError> {
        self.filters
            .iter()
            .try_fold(image, |image, filter| filter.process(image, scale))
    }

    fn init(&mut self, _params: &FilterParams) -> Result<(), FilterError> {
        Ok(())
    }

    fn params(&self) -> FilterParams {
        FilterParams::new()
    }

    fn as_list(&self) -> Option<&InputFilterList> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Clahe, Invert};

    #[test]
    fn test_empty_list_passes_through() {
        let img = GrayImage::from_raw(2, 1, vec![3, 4]).unwrap();
        let out = InputFilterList::new().process(img.clone(), 1.0).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn test_children_applied_in_order() {
        let mut list = InputFilterList::new();
        list.add(Box::new(Invert));
        list.add(Box::new(Invert));
        list.add(Box::new(Invert));
        let img = GrayImage::from_raw(2, 1, vec![0, 200]).unwrap();
        let out = list.process(img, 1.0).unwrap();
        assert_eq!(out.as_raw(), &vec![255, 55]);
    }

    #[test]
    fn test_remove_and_get() {
        let mut list: InputFilterList = vec![
            Box::new(Invert) as Box<dyn InputFilter>,
            Box::new(Clahe::default()),
        ]
        .into_iter()
        .collect();
        assert_eq!(list.len(), 2);
        assert_eq!(list.filters()[1].implementation_key(), Clahe::KEY);
        assert!(list.remove(5).is_none());
        let removed = list.remove(0).unwrap();
        assert_eq!(removed.implementation_key(), Invert::KEY);
        assert_eq!(list.get(0).unwrap().implementation_key(), Clahe::KEY);
        list.clear();
        assert!(list.is_empty());
    }

    #[test]
    fn test_composite_configuration_is_empty() {
        let mut list = InputFilterList::new();
        list.add(Box::new(Clahe::default()));
        let mut p = FilterParams::new();
        p.insert("bins".into(), "4".into());
        list.init(&p).unwrap();
        assert!(list.params().is_empty());
        assert_eq!(list.get(0).unwrap().params()["bins"], "256");
    }
}
