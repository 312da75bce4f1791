//! nii 格式 3D 体数据基础结构.
//!
//! 本模块沿用 `(z, H, W)` 内存轴序 (从文件轴序 `[W, H, z]` 置换而来),
//! 所有下游模块 (指标、注册、快照) 均按该模式访问体素.

use std::ops::{Index, IndexMut};
use std::path::Path;

use ndarray::{Array3, ArrayView, ArrayViewMut, Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::consts::labels;
use crate::Idx3d;

mod snapshot;

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 将 (W, H, z) 转换成 (z, H, W). 以后均按照该模式访问.
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx3d {
    // [W, H, z]. 体素个数数组.
    let [_, w, h, z, ..] = h.dim;
    (z as usize, h as usize, w as usize)
}

/// 根据形状和体素分辨率构造一个最小可用的 nii header.
///
/// 主要用于从内存数据直接合成体数据的场合 (管线中间结果与测试).
/// `shape` 为 `(z, H, W)`, `pix_dim` 为 `[z_mm, h_mm, w_mm]`.
pub fn synthetic_header((z, h, w): Idx3d, pix_dim: [f64; 3]) -> NiftiHeader {
    let mut hdr = NiftiHeader::default();
    hdr.dim = [3, w as u16, h as u16, z as u16, 1, 1, 1, 1];
    hdr.pixdim = [
        1.0,
        pix_dim[2] as f32,
        pix_dim[1] as f32,
        pix_dim[0] as f32,
        0.0,
        0.0,
        0.0,
        0.0,
    ];
    hdr
}

/// nii 格式 3D 体数据 header 的共用属性和通用几何操作.
pub trait NiftiGeom {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取数据形状大小, 形如 `(z, H, W)`.
    #[inline]
    fn shape(&self) -> Idx3d {
        get_shape_from_header(self.header())
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 获取单个体素分辨率. 该分辨率以毫米为单位, 分别代表空间 (相邻切片方向),
    /// 高 (自然图像的垂直方向), 宽 (自然图像的水平方向).
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let [_, w, h, z, ..] = self.header().pixdim;
        [z as f64, h as f64, w as f64]
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.pix_dim().iter().product()
    }

    /// 两个体数据是否落在同一采样网格上 (形状一致且分辨率几乎一致)?
    ///
    /// 表面距离等物理量要求两输入同网格, 调用侧应先以此检查.
    fn same_grid<G: NiftiGeom>(&self, other: &G) -> bool {
        const DIM_EPS: f64 = 1e-4;

        self.shape() == other.shape()
            && self
                .pix_dim()
                .iter()
                .zip(other.pix_dim())
                .all(|(a, b)| (a - b).abs() < DIM_EPS)
    }
}

/// 将内存中 `(z, H, W)` 轴序的数据按文件轴序 `[W, H, z]` 写入 nii 文件.
///
/// 与读入路径互为镜像: 读入时做 `[2, 1, 0]` 置换, 写出时再置换回去.
/// 压缩与否由 `path` 扩展名 (`.nii` / `.nii.gz`) 决定.
fn write_permuted<T>(header: &NiftiHeader, data: &Array3<T>, path: &Path) -> nifti::Result<()>
where
    T: Clone + nifti::volume::element::DataElement + bytemuck::Pod,
{
    let file_order = data.view().permuted_axes([2, 1, 0]);
    WriterOptions::new(path)
        .reference_header(header)
        .write_nifti(&file_order)
}

/// nii 格式 3D 强度图像, 包括 header 和体素强度值. 强度值以 `f32` 保存.
#[derive(Debug, Clone)]
pub struct ScanVolume {
    header: BoxedHeader,
    data: Array3<f32>,
}

impl NiftiGeom for ScanVolume {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for ScanVolume {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for ScanVolume {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl ScanVolume {
    /// 打开 nii 文件格式的 3D 强度图像. `path` 为 nii 文件的本地路径.
    /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> nifti::Result<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());

        // [W, H, z] -> [z, H, W].
        // hint: 原第一维向下增长, 原第二维向右增长.
        let data = obj
            .into_volume()
            .into_ndarray()?
            .permuted_axes([2, 1, 0].as_slice());

        // The nature of nifti data field layout.
        debug_assert!(data.is_standard_layout());

        // 该操作不会生成 `Err`, 可直接 unwrap.
        let data =
            Array3::<f32>::from_shape_vec(get_shape_from_header(&header), data.into_raw_vec())
                .unwrap();

        Ok(Self { header, data })
    }

    /// 根据裸数据和 header 直接创建 `ScanVolume` 实体.
    ///
    /// `data` 须为 `(z, H, W)` 轴序, 且形状与 `header` 一致, 否则返回 `None`.
    pub fn from_parts(header: NiftiHeader, data: Array3<f32>) -> Option<Self> {
        if get_shape_from_header(&header) != data.dim() {
            return None;
        }
        Some(Self {
            header: Box::new(header),
            data,
        })
    }

    /// 将图像按 `(z, H, W) -> [W, H, z]` 镜像写入 `path` 指定的 nii 文件.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> nifti::Result<()> {
        write_permuted(&self.header, &self.data, path.as_ref())
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, f32, Ix3> {
        self.data.view_mut()
    }
}

/// nii 格式 3D 分割标注, 包括 header 和类别标签. 标签值以 `u8` 保存.
#[derive(Debug, Clone)]
pub struct LabelVolume {
    header: BoxedHeader,
    data: Array3<u8>,
}

impl NiftiGeom for LabelVolume {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for LabelVolume {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for LabelVolume {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl LabelVolume {
    /// 打开 nii 文件格式的 3D 分割标注. `path` 为 nii 文件的本地路径.
    /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    ///
    /// # 注意
    ///
    /// 注册引擎输出的标注常以浮点体素存储; 读入时按 nifti
    /// 规则转换到 `u8`. 最近邻重采样保证这些浮点值是精确整数.
    pub fn open<P: AsRef<Path>>(path: P) -> nifti::Result<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());

        // [W, H, z] -> [z, H, W]
        // hint: 原第一维向下增长, 原第二维向右增长.
        let data = obj
            .into_volume()
            .into_ndarray::<u8>()?
            .permuted_axes([2, 1, 0].as_slice());

        // The nature of nifti data field layout.
        debug_assert!(data.is_standard_layout());

        // 该操作不会生成 `Err`, 可直接 unwrap.
        let data =
            Array3::<u8>::from_shape_vec(get_shape_from_header(&header), data.into_raw_vec())
                .unwrap();

        Ok(Self { header, data })
    }

    /// 根据裸标签数据和 header 直接创建 `LabelVolume` 实体.
    ///
    /// `data` 须为 `(z, H, W)` 轴序, 且形状与 `header` 一致, 否则返回 `None`.
    pub fn from_parts(header: NiftiHeader, data: Array3<u8>) -> Option<Self> {
        if get_shape_from_header(&header) != data.dim() {
            return None;
        }
        Some(Self {
            header: Box::new(header),
            data,
        })
    }

    /// 将标注按 `(z, H, W) -> [W, H, z]` 镜像写入 `path` 指定的 nii 文件.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> nifti::Result<()> {
        write_permuted(&self.header, &self.data, path.as_ref())
    }

    /// 以 `label` 为目标值将标注二值化.
    pub fn binarize(&self, label: u8) -> Array3<bool> {
        self.data.mapv(|p| p == label)
    }

    /// 获取 "任意前景" 掩码, 即所有标签值大于背景值的体素.
    pub fn foreground_mask(&self) -> Array3<bool> {
        self.data.mapv(labels::is_foreground)
    }

    /// 一次遍历统计所有出现过的标签值. 下标即标签值.
    pub fn label_presence(&self) -> [bool; 256] {
        let mut seen = [false; 256];
        for p in self.data.iter() {
            seen[*p as usize] = true;
        }
        seen
    }

    /// 按升序列出所有出现过的标签值.
    pub fn distinct_labels(&self) -> Vec<u8> {
        let seen = self.label_presence();
        (0..=u8::MAX).filter(|l| seen[*l as usize]).collect()
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, u8, Ix3> {
        self.data.view_mut()
    }

    /// 获取 z 方向第 `z_index` 层切片视图. 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> ArrayView<'_, u8, ndarray::Ix2> {
        self.data.index_axis(Axis(0), z_index)
    }
}

/// nii 格式的 3D 强度图像与对应的分割标注.
///
/// 该结构完全透明, 仅包含两个公开的 `scan` 和 `seg` 子结构,
/// 用户可以直接使用它们来实现相关上层功能.
///
/// # 注意
///
/// 两个子结构的网格一致性由用户保证, 否则程序行为未定义.
#[derive(Debug, Clone)]
pub struct VolumePair {
    /// 3D 强度图像.
    pub scan: ScanVolume,

    /// 3D 分割标注.
    pub seg: LabelVolume,
}

impl VolumePair {
    /// 分别从 `scan_path` 和 `seg_path` 打开强度图像与分割标注.
    pub fn open<P: AsRef<Path>>(scan_path: P, seg_path: P) -> nifti::Result<Self> {
        Ok(Self {
            scan: ScanVolume::open(scan_path)?,
            seg: LabelVolume::open(seg_path)?,
        })
    }
}
