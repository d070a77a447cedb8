use crate::common_io::{read_lines_of_types, write_lines, Delimiter};
use crate::traits::IoOps;
use candle_core::{DType, Device, Tensor};

impl IoOps for Tensor {
    type Scalar = f32;
    type Mat = Self;

    fn read_file_delim(
        file: &str,
        delim: impl Into<Delimiter>,
        skip: Option<usize>,
    ) -> anyhow::Result<Self::Mat> {
        let hdr_line = match skip {
            Some(skip) => skip as i64,
            None => -1, // no skipping
        };

        let data = read_lines_of_types::<f32>(file, delim, hdr_line)?.lines;

        if data.is_empty() {
            return Err(anyhow::anyhow!("no data in {}", file));
        }

        let ncols = data[0].len();
        let nrows = data.len();

        if let Some(i) = data.iter().position(|row| row.len() != ncols) {
            return Err(anyhow::anyhow!(
                "{}: row {} has {} columns, expected {}",
                file,
                i + 1,
                data[i].len(),
                ncols
            ));
        }

        let data = data.into_iter().flatten().collect::<Vec<_>>();
        Ok(Tensor::from_vec(data, (nrows, ncols), &Device::Cpu)?)
    }

    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()> {
        if self.rank() != 2 {
            return Err(anyhow::anyhow!("expected 2 dimensions, got {}", self.rank()));
        }

        let rows = self
            .to_device(&Device::Cpu)?
            .to_dtype(DType::F32)?
            .to_vec2::<f32>()?;

        let lines: Vec<Box<str>> = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|x| x.to_string())
                    .collect::<Vec<_>>()
                    .join(delim)
                    .into_boxed_str()
            })
            .collect();

        write_lines(&lines, file)
    }
}
