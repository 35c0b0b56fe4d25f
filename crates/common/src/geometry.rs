// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Minimal geometry model.
//!
//! Real topology operations belong to an external geometry engine. What lives here is just
//! enough to carry shapes through rows and across the wire, and to answer envelope
//! intersection for spatial filters.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Encode, Decode,
)]
pub enum GeometryType {
    #[default]
    Null,
    Point,
    Multipoint,
    Polyline,
    Polygon,
    Multipatch,
}

impl Display for GeometryType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GeometryType::Null => "null",
            GeometryType::Point => "point",
            GeometryType::Multipoint => "multipoint",
            GeometryType::Polyline => "polyline",
            GeometryType::Polygon => "polygon",
            GeometryType::Multipatch => "multipatch",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Encode, Decode)]
pub struct SpatialReference {
    /// Well-known id, e.g. 2056 for CH1903+ / LV95.
    pub wkid: i32,
    pub xy_tolerance: Option<f64>,
}

impl SpatialReference {
    pub fn from_wkid(wkid: i32) -> Self {
        Self {
            wkid,
            xy_tolerance: None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Envelope {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Envelope {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin: xmin.min(xmax),
            ymin: ymin.min(ymax),
            xmax: xmin.max(xmax),
            ymax: ymin.max(ymax),
        }
    }

    pub fn of_point(p: &Point) -> Self {
        Self::new(p.x, p.y, p.x, p.y)
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    pub fn union(&self, other: &Envelope) -> Envelope {
        Envelope {
            xmin: self.xmin.min(other.xmin),
            ymin: self.ymin.min(other.ymin),
            xmax: self.xmax.max(other.xmax),
            ymax: self.ymax.max(other.ymax),
        }
    }

    /// Closed-interval intersection; touching envelopes intersect.
    pub fn intersects(&self, other: &Envelope) -> bool {
        self.xmin <= other.xmax
            && other.xmin <= self.xmax
            && self.ymin <= other.ymax
            && other.ymin <= self.ymax
    }

    pub fn contains_point(&self, p: &Point) -> bool {
        p.x >= self.xmin && p.x <= self.xmax && p.y >= self.ymin && p.y <= self.ymax
    }

    fn from_points<'a>(points: impl IntoIterator<Item = &'a Point>) -> Option<Envelope> {
        points
            .into_iter()
            .map(Envelope::of_point)
            .reduce(|acc, e| acc.union(&e))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Point(Point),
    Multipoint(Vec<Point>),
    /// One or more paths.
    Polyline(Vec<Vec<Point>>),
    /// One or more rings, the first being the exterior.
    Polygon(Vec<Vec<Point>>),
    Envelope(Envelope),
}

impl Geometry {
    pub fn point(x: f64, y: f64) -> Self {
        Geometry::Point(Point::new(x, y))
    }

    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Geometry::Point(_) => GeometryType::Point,
            Geometry::Multipoint(_) => GeometryType::Multipoint,
            Geometry::Polyline(_) => GeometryType::Polyline,
            Geometry::Polygon(_) | Geometry::Envelope(_) => GeometryType::Polygon,
        }
    }

    /// The bounding box, or None for an empty geometry.
    pub fn envelope(&self) -> Option<Envelope> {
        match self {
            Geometry::Point(p) => Some(Envelope::of_point(p)),
            Geometry::Multipoint(points) => Envelope::from_points(points),
            Geometry::Polyline(parts) | Geometry::Polygon(parts) => {
                Envelope::from_points(parts.iter().flatten())
            }
            Geometry::Envelope(e) => Some(*e),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.envelope().is_none()
    }

    /// Envelope-based intersection test. Exact relational operators are the job of the
    /// geometry engine; for filtering candidate rows the envelope test is what the
    /// spatial index would answer as well.
    pub fn intersects(&self, other: &Geometry) -> bool {
        match (self.envelope(), other.envelope()) {
            (Some(a), Some(b)) => a.intersects(&b),
            _ => false,
        }
    }

    pub fn point_count(&self) -> usize {
        match self {
            Geometry::Point(_) => 1,
            Geometry::Multipoint(points) => points.len(),
            Geometry::Polyline(parts) | Geometry::Polygon(parts) => {
                parts.iter().map(|p| p.len()).sum()
            }
            Geometry::Envelope(_) => 4,
        }
    }

    /// Flatten into part boundaries and interleaved coordinates, the representation used by
    /// the wire shape codec.
    pub fn to_parts(&self) -> (Vec<u32>, Vec<f64>) {
        let mut offsets = Vec::new();
        let mut coords = Vec::with_capacity(self.point_count() * 2);
        let mut push_part = |part: &[Point], offsets: &mut Vec<u32>| {
            offsets.push((coords.len() / 2) as u32);
            for p in part {
                coords.push(p.x);
                coords.push(p.y);
            }
        };
        match self {
            Geometry::Point(p) => push_part(std::slice::from_ref(p), &mut offsets),
            Geometry::Multipoint(points) => push_part(points, &mut offsets),
            Geometry::Polyline(parts) | Geometry::Polygon(parts) => {
                for part in parts {
                    push_part(part, &mut offsets);
                }
            }
            Geometry::Envelope(e) => {
                let ring = [
                    Point::new(e.xmin, e.ymin),
                    Point::new(e.xmin, e.ymax),
                    Point::new(e.xmax, e.ymax),
                    Point::new(e.xmax, e.ymin),
                ];
                push_part(&ring, &mut offsets);
            }
        }
        (offsets, coords)
    }

    /// Rebuild a geometry from its part boundaries and coordinates. Returns None if the
    /// layout is inconsistent.
    pub fn from_parts(
        geometry_type: GeometryType,
        offsets: &[u32],
        coords: &[f64],
    ) -> Option<Geometry> {
        if coords.len() % 2 != 0 {
            return None;
        }
        let points: Vec<Point> = coords
            .chunks_exact(2)
            .map(|c| Point::new(c[0], c[1]))
            .collect();
        let mut parts = Vec::with_capacity(offsets.len());
        for (i, start) in offsets.iter().enumerate() {
            let start = *start as usize;
            let end = offsets
                .get(i + 1)
                .map(|e| *e as usize)
                .unwrap_or(points.len());
            if start > end || end > points.len() {
                return None;
            }
            parts.push(points[start..end].to_vec());
        }
        match geometry_type {
            GeometryType::Point => points.first().map(|p| Geometry::Point(*p)),
            GeometryType::Multipoint => Some(Geometry::Multipoint(points)),
            GeometryType::Polyline => Some(Geometry::Polyline(parts)),
            GeometryType::Polygon => Some(Geometry::Polygon(parts)),
            GeometryType::Null | GeometryType::Multipatch => None,
        }
    }
}
