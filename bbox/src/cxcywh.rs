use super::{Corners, Rect};
use crate::{common::*, Transform};

/// Bounding box in center-size `(cx, cy, w, h)` format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CxCyWH<T> {
    pub(crate) cx: T,
    pub(crate) cy: T,
    pub(crate) w: T,
    pub(crate) h: T,
}

impl<T> CxCyWH<T> {
    pub fn try_cast<V>(self) -> Option<CxCyWH<V>>
    where
        T: ToPrimitive,
        V: NumCast,
    {
        Some(CxCyWH {
            cx: V::from(self.cx)?,
            cy: V::from(self.cy)?,
            w: V::from(self.w)?,
            h: V::from(self.h)?,
        })
    }

    pub fn cast<V>(self) -> CxCyWH<V>
    where
        T: ToPrimitive,
        V: NumCast,
    {
        self.try_cast().unwrap()
    }
}

impl<T> CxCyWH<T>
where
    T: Copy + Num,
{
    pub fn transform(&self, transform: &Transform<T>) -> Self {
        CxCyWH {
            cx: self.cx * transform.sx + transform.tx,
            cy: self.cy * transform.sy + transform.ty,
            w: self.w * transform.sx,
            h: self.h * transform.sy,
        }
    }
}

impl<T> CxCyWH<T>
where
    T: Copy + Num + PartialOrd,
{
    pub fn try_scale_wh(&self, scale_w: T, scale_h: T) -> Result<Self> {
        let zero = T::zero();
        ensure!(
            scale_w > zero && scale_h > zero,
            "scaling factor must be positive"
        );

        let Self { cx, cy, w, h, .. } = *self;
        let w = w * scale_w;
        let h = h * scale_h;
        debug_assert!(w >= zero && h >= zero);
        Ok(Self { cx, cy, w, h })
    }

    pub fn scale_wh(&self, scale_w: T, scale_h: T) -> Self {
        self.try_scale_wh(scale_w, scale_h).unwrap()
    }
}

impl<T> Rect for CxCyWH<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn x1(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.cx - self.w / two
    }

    fn y1(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.cy - self.h / two
    }

    fn x2(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.cx + self.w / two
    }

    fn y2(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.cy + self.h / two
    }

    fn cx(&self) -> Self::Type {
        self.cx
    }

    fn cy(&self) -> Self::Type {
        self.cy
    }

    fn w(&self) -> Self::Type {
        self.w
    }

    fn h(&self) -> Self::Type {
        self.h
    }

    fn try_from_corners(corners: [T; 4]) -> Result<Self> {
        let [x1, y1, x2, y2] = corners;
        let zero = T::zero();
        let two = T::one() + T::one();
        let w = x2 - x1;
        let h = y2 - y1;
        ensure!(
            w >= zero && h >= zero,
            "box width and height must be non-negative"
        );

        let cx = x1 + w / two;
        let cy = y1 + h / two;

        Ok(Self { cx, cy, w, h })
    }

    fn try_from_cxcywh(cxcywh: [T; 4]) -> Result<Self> {
        let [cx, cy, w, h] = cxcywh;
        let zero = T::zero();
        ensure!(
            w >= zero && h >= zero,
            "box width and height must be non-negative"
        );

        Ok(Self { cx, cy, w, h })
    }
}

impl<T> From<Corners<T>> for CxCyWH<T>
where
    T: Copy + Num,
{
    fn from(from: Corners<T>) -> Self {
        Self::from(&from)
    }
}

impl<T> From<&Corners<T>> for CxCyWH<T>
where
    T: Copy + Num,
{
    fn from(from: &Corners<T>) -> Self {
        let two = T::one() + T::one();
        let Corners { x1, y1, x2, y2, .. } = *from;
        let w = x2 - x1;
        let h = y2 - y1;
        let cx = x1 + w / two;
        let cy = y1 + h / two;
        Self { cx, cy, w, h }
    }
}
