use super::{CxCyWH, Rect};
use crate::{common::*, Transform};

/// Bounding box in corner `(x1, y1, x2, y2)` format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Corners<T> {
    pub(crate) x1: T,
    pub(crate) y1: T,
    pub(crate) x2: T,
    pub(crate) y2: T,
}

impl<T> Corners<T> {
    pub fn try_cast<V>(self) -> Option<Corners<V>>
    where
        T: ToPrimitive,
        V: NumCast,
    {
        Some(Corners {
            x1: V::from(self.x1)?,
            y1: V::from(self.y1)?,
            x2: V::from(self.x2)?,
            y2: V::from(self.y2)?,
        })
    }

    pub fn cast<V>(self) -> Corners<V>
    where
        T: ToPrimitive,
        V: NumCast,
    {
        self.try_cast().unwrap()
    }
}

impl<T> Corners<T>
where
    T: Copy + Num + Neg<Output = T>,
{
    /// The `(-1, -1, -1, -1)` marker denoting "no object" in a padded
    /// ground truth array.
    pub fn sentinel() -> Self {
        let minus_one = -T::one();
        Self {
            x1: minus_one,
            y1: minus_one,
            x2: minus_one,
            y2: minus_one,
        }
    }

    /// A box is a sentinel iff all four coordinates are exactly -1.
    pub fn is_sentinel(&self) -> bool
    where
        T: PartialEq,
    {
        let minus_one = -T::one();
        self.x1 == minus_one && self.y1 == minus_one && self.x2 == minus_one && self.y2 == minus_one
    }
}

impl<T> Corners<T>
where
    T: Copy + Num,
{
    pub fn transform(&self, transform: &Transform<T>) -> Self {
        Corners {
            x1: self.x1 * transform.sx + transform.tx,
            y1: self.y1 * transform.sy + transform.ty,
            x2: self.x2 * transform.sx + transform.tx,
            y2: self.y2 * transform.sy + transform.ty,
        }
    }
}

impl<T> Rect for Corners<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn x1(&self) -> Self::Type {
        self.x1
    }

    fn y1(&self) -> Self::Type {
        self.y1
    }

    fn x2(&self) -> Self::Type {
        self.x2
    }

    fn y2(&self) -> Self::Type {
        self.y2
    }

    fn cx(&self) -> Self::Type {
        let one = T::one();
        let two = one + one;
        self.x1 + self.w() / two
    }

    fn cy(&self) -> Self::Type {
        let one = T::one();
        let two = one + one;
        self.y1 + self.h() / two
    }

    fn w(&self) -> Self::Type {
        self.x2 - self.x1
    }

    fn h(&self) -> Self::Type {
        self.y2 - self.y1
    }

    fn try_from_corners(corners: [Self::Type; 4]) -> Result<Self> {
        let [x1, y1, x2, y2] = corners;
        ensure!(x2 >= x1 && y2 >= y1, "x2 >= x1 and y2 >= y1 must hold");

        Ok(Self { x1, y1, x2, y2 })
    }

    fn try_from_cxcywh(cxcywh: [Self::Type; 4]) -> Result<Self> {
        let [cx, cy, w, h] = cxcywh;
        let zero = T::zero();
        ensure!(w >= zero && h >= zero, "w and h must be non-negative");

        let two = T::one() + T::one();
        let x1 = cx - w / two;
        let x2 = cx + w / two;
        let y1 = cy - h / two;
        let y2 = cy + h / two;

        Ok(Self { x1, y1, x2, y2 })
    }
}

impl<T> From<CxCyWH<T>> for Corners<T>
where
    T: Copy + Num,
{
    fn from(from: CxCyWH<T>) -> Self {
        Self::from(&from)
    }
}

impl<T> From<&CxCyWH<T>> for Corners<T>
where
    T: Copy + Num,
{
    fn from(from: &CxCyWH<T>) -> Self {
        let two = T::one() + T::one();
        let CxCyWH { cx, cy, w, h, .. } = *from;
        let x1 = cx - w / two;
        let y1 = cy - h / two;
        let x2 = cx + w / two;
        let y2 = cy + h / two;
        Self { x1, y1, x2, y2 }
    }
}
