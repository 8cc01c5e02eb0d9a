// Signed coefficient planes produced by the forward subband transform and
// consumed by HZCC / the inverse transform. Grounded on
// examples/original_source/src/frame.c's dsv_mk_coefs and
// nekotrix-tinyavif/src/array2d.rs for the backing storage.

use crate::array2d::Array2D;
use crate::frame::Plane;
use crate::meta::{h_shift, v_shift};
use crate::util;

pub type Sbc = i32;

pub struct CoefPlane {
  pub data: Array2D<Sbc>,
}

impl CoefPlane {
  pub fn new(width: usize, height: usize) -> Self {
    Self { data: Array2D::zeroed(height, width) }
  }

  pub fn width(&self) -> usize {
    self.data.cols()
  }

  pub fn height(&self) -> usize {
    self.data.rows()
  }

  // Loads a residual plane's 128-biased pixels into the transform's signed
  // working domain. Chroma coef planes are rounded up to even dimensions
  // (see `CoefFrame::new`) and so can be one sample wider/taller than the
  // source plane; the extra row/column is left at its zeroed default.
  pub fn load_residual(&mut self, plane: &Plane) {
    let h = util::min(self.height(), plane.height);
    let w = util::min(self.width(), plane.width);
    for y in 0..h {
      for x in 0..w {
        self.data[y][x] = plane.get(x as isize, y as isize) as i32 - 128;
      }
    }
  }

  // Inverse of `load_residual`, clamping back into the 8-bit residual range.
  pub fn store_residual(&self, plane: &mut Plane) {
    let h = util::min(self.height(), plane.height);
    let w = util::min(self.width(), plane.width);
    for y in 0..h {
      for x in 0..w {
        plane.set(x as isize, y as isize, util::clamp(self.data[y][x] + 128, 0, 255) as u8);
      }
    }
  }
}

pub struct CoefFrame {
  planes: [CoefPlane; 3],
}

impl CoefFrame {
  // Chroma planes are rounded up to even dimensions (distinct from the
  // pixel-plane chroma sizing in `frame`, which does not round to even).
  pub fn new(format: u8, width: usize, height: usize) -> Self {
    let cw = util::round_pow2(util::ceil_shift(width as u32, h_shift(format) as u32), 1) as usize;
    let ch = util::round_pow2(util::ceil_shift(height as u32, v_shift(format) as u32), 1) as usize;
    Self {
      planes: [CoefPlane::new(width, height), CoefPlane::new(cw, ch), CoefPlane::new(cw, ch)],
    }
  }

  pub fn plane(&self, idx: usize) -> &CoefPlane {
    &self.planes[idx]
  }

  pub fn plane_mut(&mut self, idx: usize) -> &mut CoefPlane {
    &mut self.planes[idx]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn chroma_dims_round_to_even() {
    let cf = CoefFrame::new(crate::meta::SUBSAMP_420, 33, 17);
    assert_eq!(cf.plane(1).width() % 2, 0);
    assert_eq!(cf.plane(1).height() % 2, 0);
  }
}
