/// A relative path inside the image, using `/` (or `\`) separators.
///
/// The empty path denotes the root directory.
#[derive(Debug)]
#[repr(transparent)]
pub struct IsoPath(str);

impl IsoPath {
  pub fn new<S: AsRef<str> + ?Sized>(s: &S) -> &Self {
    unsafe { &*(s.as_ref() as *const str as *const IsoPath) }
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn is_root(&self) -> bool {
    self.0.is_empty()
  }

  /// Returns the components of this path as an iterator.
  pub fn components(&self) -> Components<'_> {
    Components { path: &self.0 }
  }

  /// The path of the containing directory; the root for single-component
  /// paths.
  pub fn parent(&self) -> &IsoPath {
    match self.0.rfind(['/', '\\']) {
      Some(pos) => IsoPath::new(&self.0[..pos]),
      None => IsoPath::new(""),
    }
  }

  /// The final component of the path.
  pub fn file_name(&self) -> &str {
    match self.0.rfind(['/', '\\']) {
      Some(pos) => &self.0[pos + 1..],
      None => &self.0,
    }
  }
}

impl AsRef<IsoPath> for str {
  fn as_ref(&self) -> &IsoPath {
    IsoPath::new(self)
  }
}

pub struct Components<'a> {
  path: &'a str,
}

impl<'a> Iterator for Components<'a> {
  type Item = &'a str;

  fn next(&mut self) -> Option<Self::Item> {
    if self.path.is_empty() {
      return None;
    }

    if let Some(pos) = self.path.find(['/', '\\']) {
      let part = &self.path[..pos];
      self.path = &self.path[pos + 1..];
      Some(part)
    } else {
      let part = self.path;
      self.path = "";
      Some(part)
    }
  }
}
